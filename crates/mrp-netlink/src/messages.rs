//! Bridge netlink messages for MRP offload.
//!
//! Every request is an `RTM_SETLINK`/`RTM_DELLINK` message with an
//! `ifinfomsg` header (family `PF_BRIDGE`) followed by attributes:
//!
//! ```text
//! IFLA_AF_SPEC
//! ├── IFLA_BRIDGE_FLAGS (BRIDGE_FLAGS_SELF, bridge requests only)
//! └── IFLA_BRIDGE_MRP
//!     └── IFLA_BRIDGE_MRP_<request>
//!         └── request attributes
//! ```
//!
//! FDB flushes use `IFLA_PROTINFO` / `IFLA_BRPORT_FLUSH` instead.

use mrp::types::{PortRole, PortState, RingKey, RingRole, RingState};
use netlink_packet_core::{DecodeError, NetlinkDeserializable, NetlinkHeader, NetlinkSerializable};
use netlink_packet_utils::Emitable;
use netlink_packet_utils::nla::Nla;
use std::time::Duration;

pub const PF_BRIDGE: u8 = libc::PF_BRIDGE as u8;

pub const RTM_NEWLINK: u16 = 16;
pub const RTM_DELLINK: u16 = 17;
pub const RTM_SETLINK: u16 = 19;

/// Length of `struct ifinfomsg`
pub const IFINFOMSG_LEN: usize = 16;

pub const IFLA_ADDRESS: u16 = 1;
pub const IFLA_PROTINFO: u16 = 12;
pub const IFLA_OPERSTATE: u16 = 16;
pub const IFLA_AF_SPEC: u16 = 26;

pub const IFLA_BRPORT_FLUSH: u16 = 24;

pub const IFLA_BRIDGE_FLAGS: u16 = 0;
pub const IFLA_BRIDGE_MRP: u16 = 4;
pub const BRIDGE_FLAGS_SELF: u16 = 2;

/// `IFLA_BRIDGE_MRP_*` request attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MrpAttr {
    Instance = 1,
    PortState = 2,
    PortRole = 3,
    RingState = 4,
    RingRole = 5,
    StartTest = 6,
}

mod instance {
    pub const RING_ID: u16 = 1;
    pub const P_IFINDEX: u16 = 2;
    pub const S_IFINDEX: u16 = 3;
    pub const PRIO: u16 = 4;
}

mod port_state {
    pub const STATE: u16 = 1;
}

mod port_role {
    pub const ROLE: u16 = 1;
}

mod ring_state {
    pub const RING_ID: u16 = 1;
    pub const STATE: u16 = 2;
}

mod ring_role {
    pub const RING_ID: u16 = 1;
    pub const ROLE: u16 = 2;
}

mod start_test {
    pub const RING_ID: u16 = 1;
    pub const INTERVAL: u16 = 2;
    pub const MAX_MISS: u16 = 3;
    pub const PERIOD: u16 = 4;
}

/// Link attribute tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNla {
    Nested(u16, Vec<LinkNla>),
    U16(u16, u16),
    U32(u16, u32),
    Flag(u16),
}

impl Nla for LinkNla {
    fn value_len(&self) -> usize {
        match self {
            Self::Nested(_, nlas) => nlas.iter().map(|nla| nla.buffer_len()).sum(),
            Self::U16(..) => 2,
            Self::U32(..) => 4,
            Self::Flag(_) => 0,
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::Nested(kind, _) | Self::U16(kind, _) | Self::U32(kind, _) | Self::Flag(kind) => {
                *kind
            }
        }
    }

    fn is_nested(&self) -> bool {
        matches!(self, Self::Nested(..))
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::Nested(_, nlas) => {
                let mut offset = 0;
                for nla in nlas {
                    let len = nla.buffer_len();
                    nla.emit(&mut buffer[offset..offset + len]);
                    offset += len;
                }
            }
            Self::U16(_, v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::U32(_, v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Flag(_) => {}
        }
    }
}

/// Kernel encoding of a port state (`BR_MRP_PORT_STATE_*`).
pub fn kernel_port_state(state: PortState) -> u32 {
    match state {
        PortState::Disabled => 0,
        PortState::Blocked => 1,
        PortState::Forwarding => 2,
    }
}

fn micros(d: Duration) -> u32 {
    d.as_micros().min(u32::MAX as u128) as u32
}

/// An `RTM_*LINK` request for the bridge family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    pub message_type: u16,
    pub ifindex: u32,
    pub nlas: Vec<LinkNla>,
}

impl BridgeRequest {
    fn mrp(message_type: u16, ifindex: u32, self_flag: bool, attr: MrpAttr, nlas: Vec<LinkNla>) -> Self {
        let mut spec = Vec::with_capacity(2);
        if self_flag {
            spec.push(LinkNla::U16(IFLA_BRIDGE_FLAGS, BRIDGE_FLAGS_SELF));
        }
        spec.push(LinkNla::Nested(
            IFLA_BRIDGE_MRP,
            vec![LinkNla::Nested(attr as u16, nlas)],
        ));
        Self {
            message_type,
            ifindex,
            nlas: vec![LinkNla::Nested(IFLA_AF_SPEC, spec)],
        }
    }

    pub fn add_ring(ring: RingKey, primary: u32, secondary: u32, priority: u16) -> Self {
        Self::mrp(
            RTM_SETLINK,
            ring.bridge,
            true,
            MrpAttr::Instance,
            vec![
                LinkNla::U32(instance::RING_ID, ring.ring_nr),
                LinkNla::U32(instance::P_IFINDEX, primary),
                LinkNla::U32(instance::S_IFINDEX, secondary),
                LinkNla::U16(instance::PRIO, priority),
            ],
        )
    }

    pub fn delete_ring(ring: RingKey) -> Self {
        Self::mrp(
            RTM_DELLINK,
            ring.bridge,
            true,
            MrpAttr::Instance,
            vec![LinkNla::U32(instance::RING_ID, ring.ring_nr)],
        )
    }

    pub fn ring_role(ring: RingKey, role: RingRole) -> Self {
        Self::mrp(
            RTM_SETLINK,
            ring.bridge,
            true,
            MrpAttr::RingRole,
            vec![
                LinkNla::U32(ring_role::RING_ID, ring.ring_nr),
                LinkNla::U32(ring_role::ROLE, role as u32),
            ],
        )
    }

    pub fn ring_state(ring: RingKey, state: RingState) -> Self {
        Self::mrp(
            RTM_SETLINK,
            ring.bridge,
            true,
            MrpAttr::RingState,
            vec![
                LinkNla::U32(ring_state::RING_ID, ring.ring_nr),
                LinkNla::U32(ring_state::STATE, state as u32),
            ],
        )
    }

    pub fn port_role(port: u32, role: PortRole) -> Self {
        Self::mrp(
            RTM_SETLINK,
            port,
            false,
            MrpAttr::PortRole,
            vec![LinkNla::U32(port_role::ROLE, role as u32)],
        )
    }

    pub fn port_state(port: u32, state: PortState) -> Self {
        Self::mrp(
            RTM_SETLINK,
            port,
            false,
            MrpAttr::PortState,
            vec![LinkNla::U32(port_state::STATE, kernel_port_state(state))],
        )
    }

    /// Start (or with a zero interval, stop) kernel generated ring tests.
    pub fn start_test(ring: RingKey, interval: Duration, max_miss: u32, period: Duration) -> Self {
        Self::mrp(
            RTM_SETLINK,
            ring.bridge,
            true,
            MrpAttr::StartTest,
            vec![
                LinkNla::U32(start_test::RING_ID, ring.ring_nr),
                LinkNla::U32(start_test::INTERVAL, micros(interval)),
                LinkNla::U32(start_test::MAX_MISS, max_miss),
                LinkNla::U32(start_test::PERIOD, micros(period)),
            ],
        )
    }

    /// Flush the FDB entries learned on a bridge port.
    pub fn flush(port: u32) -> Self {
        Self {
            message_type: RTM_SETLINK,
            ifindex: port,
            nlas: vec![LinkNla::Nested(
                IFLA_PROTINFO,
                vec![LinkNla::Flag(IFLA_BRPORT_FLUSH)],
            )],
        }
    }
}

impl NetlinkSerializable for BridgeRequest {
    fn message_type(&self) -> u16 {
        self.message_type
    }

    fn buffer_len(&self) -> usize {
        IFINFOMSG_LEN + self.nlas.iter().map(Emitable::buffer_len).sum::<usize>()
    }

    fn serialize(&self, buffer: &mut [u8]) {
        // struct ifinfomsg
        buffer[..IFINFOMSG_LEN].fill(0);
        buffer[0] = PF_BRIDGE;
        buffer[4..8].copy_from_slice(&(self.ifindex as i32).to_ne_bytes());

        let mut offset = IFINFOMSG_LEN;
        for nla in &self.nlas {
            let len = Emitable::buffer_len(nla);
            Emitable::emit(nla, &mut buffer[offset..offset + len]);
            offset += len;
        }
    }
}

impl NetlinkDeserializable for BridgeRequest {
    type Error = DecodeError;

    fn deserialize(_header: &NetlinkHeader, _payload: &[u8]) -> Result<Self, Self::Error> {
        // the kernel only answers these requests with an ack or an error
        Err(DecodeError::from("unexpected bridge link message"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netlink_packet_utils::nla::NlaBuffer;

    fn serialize(req: &BridgeRequest) -> Vec<u8> {
        let mut buf = vec![0u8; req.buffer_len()];
        req.serialize(&mut buf);
        buf
    }

    /// Attribute kinds and values along the first path of nested attributes.
    fn walk(mut data: &[u8]) -> Vec<(u16, Vec<u8>)> {
        let mut out = Vec::new();
        loop {
            let nla = NlaBuffer::new_checked(data).unwrap();
            let kind = nla.kind() & !libc::NLA_F_NESTED as u16;
            out.push((kind, nla.value().to_vec()));
            if nla.nested_flag() {
                data = &data[4..nla.length() as usize];
            } else {
                return out;
            }
        }
    }

    #[test]
    fn test_ifinfomsg_header() {
        let req = BridgeRequest::port_state(7, PortState::Forwarding);
        let buf = serialize(&req);

        assert_eq!(buf[0], PF_BRIDGE);
        assert_eq!(i32::from_ne_bytes(buf[4..8].try_into().unwrap()), 7);
        assert_eq!(req.message_type(), RTM_SETLINK);
    }

    #[test]
    fn test_port_state_nesting() {
        let req = BridgeRequest::port_state(7, PortState::Forwarding);
        let path = walk(&serialize(&req)[IFINFOMSG_LEN..]);
        let kinds: Vec<u16> = path.iter().map(|(k, _)| *k).collect();

        assert_eq!(
            kinds,
            vec![
                IFLA_AF_SPEC,
                IFLA_BRIDGE_MRP,
                MrpAttr::PortState as u16,
                port_state::STATE
            ]
        );
        assert_eq!(path[3].1, 2u32.to_ne_bytes().to_vec());
    }

    #[test]
    fn test_bridge_requests_carry_self_flag() {
        let req = BridgeRequest::add_ring(RingKey::new(3, 9), 4, 5, 0x8000);
        let buf = serialize(&req);
        let spec = NlaBuffer::new_checked(&buf[IFINFOMSG_LEN..]).unwrap();
        let flags = NlaBuffer::new_checked(spec.value()).unwrap();

        assert_eq!(flags.kind(), IFLA_BRIDGE_FLAGS);
        assert_eq!(flags.value(), &BRIDGE_FLAGS_SELF.to_ne_bytes());
        assert_eq!(i32::from_ne_bytes(buf[4..8].try_into().unwrap()), 3);
    }

    #[test]
    fn test_start_test_uses_microseconds() {
        let req = BridgeRequest::start_test(
            RingKey::new(1, 2),
            Duration::from_millis(20),
            3,
            Duration::from_secs(10),
        );
        let LinkNla::Nested(_, spec) = &req.nlas[0] else {
            panic!("expected AF_SPEC");
        };
        let LinkNla::Nested(_, mrp) = &spec[1] else {
            panic!("expected MRP");
        };
        let LinkNla::Nested(kind, attrs) = &mrp[0] else {
            panic!("expected START_TEST");
        };

        assert_eq!(*kind, MrpAttr::StartTest as u16);
        assert!(attrs.contains(&LinkNla::U32(start_test::INTERVAL, 20_000)));
        assert!(attrs.contains(&LinkNla::U32(start_test::PERIOD, 10_000_000)));
        assert!(attrs.contains(&LinkNla::U32(start_test::RING_ID, 2)));
    }

    #[test]
    fn test_flush_request() {
        let req = BridgeRequest::flush(12);
        let buf = serialize(&req);
        let protinfo = NlaBuffer::new_checked(&buf[IFINFOMSG_LEN..]).unwrap();
        assert_eq!(protinfo.kind() & !(libc::NLA_F_NESTED as u16), IFLA_PROTINFO);

        let flush = NlaBuffer::new_checked(protinfo.value()).unwrap();
        assert_eq!(flush.kind(), IFLA_BRPORT_FLUSH);
        assert!(flush.value().is_empty());
    }

    #[test]
    fn test_kernel_port_states() {
        assert_eq!(kernel_port_state(PortState::Disabled), 0);
        assert_eq!(kernel_port_state(PortState::Blocked), 1);
        assert_eq!(kernel_port_state(PortState::Forwarding), 2);
    }
}
