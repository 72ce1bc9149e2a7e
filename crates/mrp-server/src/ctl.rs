//! Control protocol between `mrpctl` and the daemon.
//!
//! Every datagram starts with a native-endian header:
//!
//! | Direction | Header fields                                    | Size     |
//! |-----------|--------------------------------------------------|----------|
//! | request   | `command`, `input_len`, `output_len`             | 12 bytes |
//! | reply     | `command`, `input_len`, `output_len`, `result`   | 16 bytes |
//!
//! followed by `input_len` (request) or `output_len` (reply) payload bytes.
//! `result` is zero or a negative errno.

use bytes::{Buf, BufMut, BytesMut};
use mrp::types::{MrcState, MrmState, RingRole, RingStatus};
use serde::Serialize;
use thiserror::Error;

pub const REQUEST_HEADER_LEN: usize = 12;
pub const REPLY_HEADER_LEN: usize = 16;

const ADD_PAYLOAD_LEN: usize = 6 * 4;
const DEL_PAYLOAD_LEN: usize = 2 * 4;

/// Size of one GET status record
pub const STATUS_RECORD_LEN: usize = 8 * 4;

/// Control protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CtlError {
    #[error("message too short: {0} bytes")]
    Short(usize),

    #[error("unknown command {0}")]
    UnknownCommand(i32),

    #[error("bad payload length for {command:?}: expected {expected}, got {actual}")]
    BadLength {
        command: Command,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Command {
    Add = 1,
    Del = 2,
    Get = 3,
}

impl TryFrom<i32> for Command {
    type Error = CtlError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::Add),
            2 => Ok(Command::Del),
            3 => Ok(Command::Get),
            other => Err(CtlError::UnknownCommand(other)),
        }
    }
}

/// ADD arguments, as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddRequest {
    pub bridge: u32,
    pub ring_nr: u32,
    pub primary: u32,
    pub secondary: u32,
    pub role: u32,
    pub priority: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Add(AddRequest),
    Del { bridge: u32, ring_nr: u32 },
    /// `output_len` is the largest reply payload the client accepts
    Get { output_len: usize },
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::Add(_) => Command::Add,
            Request::Del { .. } => Command::Del,
            Request::Get { .. } => Command::Get,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = BytesMut::new();
        let mut output_len = 0;
        match self {
            Request::Add(add) => {
                for v in [
                    add.bridge,
                    add.ring_nr,
                    add.primary,
                    add.secondary,
                    add.role,
                    add.priority,
                ] {
                    payload.put_u32_ne(v);
                }
            }
            Request::Del { bridge, ring_nr } => {
                payload.put_u32_ne(*bridge);
                payload.put_u32_ne(*ring_nr);
            }
            Request::Get { output_len: len } => output_len = *len,
        }

        let mut buf = BytesMut::with_capacity(REQUEST_HEADER_LEN + payload.len());
        buf.put_i32_ne(self.command() as i32);
        buf.put_i32_ne(payload.len() as i32);
        buf.put_i32_ne(output_len as i32);
        buf.put_slice(&payload);
        buf.to_vec()
    }

    /// Decode a request. Returns the command alongside the error when the
    /// header was readable, so the caller can still reply.
    pub fn decode(data: &[u8]) -> Result<Self, (Option<Command>, CtlError)> {
        if data.len() < REQUEST_HEADER_LEN {
            return Err((None, CtlError::Short(data.len())));
        }
        let mut buf = data;
        let command = Command::try_from(buf.get_i32_ne()).map_err(|e| (None, e))?;
        let input_len = buf.get_i32_ne().max(0) as usize;
        let output_len = buf.get_i32_ne().max(0) as usize;

        let expected = match command {
            Command::Add => ADD_PAYLOAD_LEN,
            Command::Del => DEL_PAYLOAD_LEN,
            Command::Get => 0,
        };
        if input_len != expected || buf.remaining() != expected {
            return Err((
                Some(command),
                CtlError::BadLength {
                    command,
                    expected,
                    actual: buf.remaining(),
                },
            ));
        }

        Ok(match command {
            Command::Add => Request::Add(AddRequest {
                bridge: buf.get_u32_ne(),
                ring_nr: buf.get_u32_ne(),
                primary: buf.get_u32_ne(),
                secondary: buf.get_u32_ne(),
                role: buf.get_u32_ne(),
                priority: buf.get_u32_ne(),
            }),
            Command::Del => Request::Del {
                bridge: buf.get_u32_ne(),
                ring_nr: buf.get_u32_ne(),
            },
            Command::Get => Request::Get { output_len },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub command: Command,
    pub result: i32,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn new(command: Command, result: i32) -> Self {
        Self {
            command,
            result,
            payload: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(REPLY_HEADER_LEN + self.payload.len());
        buf.put_i32_ne(self.command as i32);
        buf.put_i32_ne(0);
        buf.put_i32_ne(self.payload.len() as i32);
        buf.put_i32_ne(self.result);
        buf.put_slice(&self.payload);
        buf.to_vec()
    }

    pub fn decode(data: &[u8]) -> Result<Self, CtlError> {
        if data.len() < REPLY_HEADER_LEN {
            return Err(CtlError::Short(data.len()));
        }
        let mut buf = data;
        let command = Command::try_from(buf.get_i32_ne())?;
        let _input_len = buf.get_i32_ne();
        let output_len = buf.get_i32_ne().max(0) as usize;
        let result = buf.get_i32_ne();
        if buf.remaining() != output_len {
            return Err(CtlError::BadLength {
                command,
                expected: output_len,
                actual: buf.remaining(),
            });
        }

        Ok(Self {
            command,
            result,
            payload: buf.to_vec(),
        })
    }
}

/// One ring in a GET reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRecord {
    pub bridge: u32,
    pub ring_nr: u32,
    pub primary: u32,
    pub secondary: u32,
    pub role: u32,
    pub priority: u32,
    pub mra_capable: u32,
    pub state: u32,
}

impl From<&RingStatus> for StatusRecord {
    fn from(status: &RingStatus) -> Self {
        Self {
            bridge: status.bridge,
            ring_nr: status.ring_nr,
            primary: status.primary,
            secondary: status.secondary,
            role: status.role as u32,
            priority: status.priority as u32,
            mra_capable: status.mra_capable as u32,
            state: status.state.as_u32(),
        }
    }
}

impl StatusRecord {
    fn put(&self, buf: &mut BytesMut) {
        for v in [
            self.bridge,
            self.ring_nr,
            self.primary,
            self.secondary,
            self.role,
            self.priority,
            self.mra_capable,
            self.state,
        ] {
            buf.put_u32_ne(v);
        }
    }

    fn get(buf: &mut &[u8]) -> Self {
        Self {
            bridge: buf.get_u32_ne(),
            ring_nr: buf.get_u32_ne(),
            primary: buf.get_u32_ne(),
            secondary: buf.get_u32_ne(),
            role: buf.get_u32_ne(),
            priority: buf.get_u32_ne(),
            mra_capable: buf.get_u32_ne(),
            state: buf.get_u32_ne(),
        }
    }

    /// Role name as shown by `mrpctl`.
    pub fn role_name(&self) -> String {
        match RingRole::try_from(self.role) {
            Ok(role) => role.to_string(),
            Err(_) => format!("Unknown({})", self.role),
        }
    }

    /// State name, interpreted according to the role.
    pub fn state_name(&self) -> String {
        let name = match RingRole::try_from(self.role) {
            Ok(RingRole::Mrm) => MrmState::try_from(self.state).map(|s| s.to_string()).ok(),
            Ok(RingRole::Mrc) => MrcState::try_from(self.state).map(|s| s.to_string()).ok(),
            Ok(RingRole::Disabled) => Some("-".to_string()),
            _ => None,
        };
        name.unwrap_or_else(|| format!("Unknown({})", self.state))
    }
}

/// Encode as many records as fit into `output_len` bytes.
pub fn encode_status_list(records: &[StatusRecord], output_len: usize) -> Option<Vec<u8>> {
    let room = output_len.checked_sub(4)? / STATUS_RECORD_LEN;
    let records = &records[..records.len().min(room)];

    let mut buf = BytesMut::with_capacity(4 + records.len() * STATUS_RECORD_LEN);
    buf.put_u32_ne(records.len() as u32);
    for record in records {
        record.put(&mut buf);
    }
    Some(buf.to_vec())
}

pub fn decode_status_list(payload: &[u8]) -> Result<Vec<StatusRecord>, CtlError> {
    if payload.len() < 4 {
        return Err(CtlError::Short(payload.len()));
    }
    let mut buf = payload;
    let count = buf.get_u32_ne() as usize;
    let expected = count * STATUS_RECORD_LEN;
    if buf.remaining() != expected {
        return Err(CtlError::BadLength {
            command: Command::Get,
            expected,
            actual: buf.remaining(),
        });
    }

    Ok((0..count).map(|_| StatusRecord::get(&mut buf)).collect())
}

/// A GET record with interface names resolved, as printed by `mrpctl`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RingLine {
    pub bridge: String,
    pub ring_nr: u32,
    pub pport: String,
    pub sport: String,
    pub mra_support: u32,
    pub ring_role: String,
    pub prio: u32,
    pub ring_state: String,
}

impl RingLine {
    pub fn new(record: &StatusRecord, name: impl Fn(u32) -> String) -> Self {
        Self {
            bridge: name(record.bridge),
            ring_nr: record.ring_nr,
            pport: name(record.primary),
            sport: name(record.secondary),
            mra_support: record.mra_capable,
            ring_role: record.role_name(),
            prio: record.priority,
            ring_state: record.state_name(),
        }
    }
}

impl std::fmt::Display for RingLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "bridge: {} ring_nr: {} pport: {} sport: {} mra_support: {} ring_role: {} prio: {} ring_state: {}",
            self.bridge,
            self.ring_nr,
            self.pport,
            self.sport,
            self.mra_support,
            self.ring_role,
            self.prio,
            self.ring_state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrp::types::SubState;

    fn record(ring_nr: u32) -> StatusRecord {
        StatusRecord {
            bridge: 3,
            ring_nr,
            primary: 4,
            secondary: 5,
            role: RingRole::Mrm as u32,
            priority: 0x8000,
            mra_capable: 0,
            state: MrmState::ChkRc as u32,
        }
    }

    #[test]
    fn test_add_request_layout() {
        let req = Request::Add(AddRequest {
            bridge: 3,
            ring_nr: 1,
            primary: 4,
            secondary: 5,
            role: 2,
            priority: 0x8000,
        });
        let buf = req.encode();

        assert_eq!(buf.len(), REQUEST_HEADER_LEN + 24);
        assert_eq!(i32::from_ne_bytes(buf[0..4].try_into().unwrap()), 1);
        assert_eq!(i32::from_ne_bytes(buf[4..8].try_into().unwrap()), 24);
        assert_eq!(i32::from_ne_bytes(buf[8..12].try_into().unwrap()), 0);
        assert_eq!(Request::decode(&buf).unwrap(), req);
    }

    #[test]
    fn test_get_request_carries_output_len() {
        let buf = Request::Get { output_len: 2052 }.encode();
        assert_eq!(buf.len(), REQUEST_HEADER_LEN);
        assert_eq!(
            Request::decode(&buf).unwrap(),
            Request::Get { output_len: 2052 }
        );
    }

    #[test]
    fn test_request_errors() {
        assert_eq!(Request::decode(&[0; 4]), Err((None, CtlError::Short(4))));

        let mut buf = Request::Del {
            bridge: 1,
            ring_nr: 2,
        }
        .encode();
        buf[0..4].copy_from_slice(&9i32.to_ne_bytes());
        assert_eq!(
            Request::decode(&buf),
            Err((None, CtlError::UnknownCommand(9)))
        );

        let mut buf = Request::Del {
            bridge: 1,
            ring_nr: 2,
        }
        .encode();
        buf.truncate(REQUEST_HEADER_LEN + 4);
        assert!(matches!(
            Request::decode(&buf),
            Err((Some(Command::Del), CtlError::BadLength { .. }))
        ));
    }

    #[test]
    fn test_reply_header() {
        let reply = Reply::new(Command::Del, -libc::ENOENT);
        let buf = reply.encode();

        assert_eq!(buf.len(), REPLY_HEADER_LEN);
        assert_eq!(
            i32::from_ne_bytes(buf[12..16].try_into().unwrap()),
            -libc::ENOENT
        );
        assert_eq!(Reply::decode(&buf).unwrap(), reply);
        assert!(matches!(
            Reply::decode(&buf[..8]),
            Err(CtlError::Short(8))
        ));
    }

    #[test]
    fn test_status_list_truncates_to_output_len() {
        let records = vec![record(1), record(2), record(3)];

        let payload = encode_status_list(&records, 4 + 2 * STATUS_RECORD_LEN + 7).unwrap();
        let decoded = decode_status_list(&payload).unwrap();
        assert_eq!(decoded, records[..2].to_vec());

        assert!(encode_status_list(&records, 3).is_none());
        assert_eq!(
            decode_status_list(&encode_status_list(&records, 4).unwrap()).unwrap(),
            vec![]
        );
    }

    #[test]
    fn test_record_from_status() {
        let status = RingStatus {
            bridge: 3,
            ring_nr: 1,
            primary: 4,
            secondary: 5,
            role: RingRole::Mrc,
            priority: 0xA000,
            mra_capable: true,
            state: SubState::Mrc(MrcState::DeIdle),
        };
        let record = StatusRecord::from(&status);

        assert_eq!(record.role, 1);
        assert_eq!(record.mra_capable, 1);
        assert_eq!(record.state_name(), "DE_IDLE");
        assert_eq!(record.role_name(), "MRC");
    }

    #[test]
    fn test_ring_line_format() {
        let line = RingLine::new(&record(1), |ifindex| format!("eth{ifindex}"));
        assert_eq!(
            line.to_string(),
            "bridge: eth3 ring_nr: 1 pport: eth4 sport: eth5 mra_support: 0 ring_role: MRM prio: 32768 ring_state: CHK_RC"
        );
    }
}
