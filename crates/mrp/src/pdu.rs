//! MRP PDU encoding and decoding.
//!
//! An MRP frame is an Ethernet header followed by the MRP version and a
//! sequence of TLVs terminated by an End TLV:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 Destination MAC (6 bytes) ...                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   Source MAC (6 bytes) ...                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      EtherType (0x88E3)       |            Version            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   TLV Type    |  TLV Length   |         Payload ...           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                              ...                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   End (0x00)  |       0       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! All multi-byte fields are in network byte order.

use crate::types::{DomainId, MRP_DOMAIN_UUID_LENGTH, MRP_ETHERTYPE, MRP_VERSION, MacAddr};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

/// Ethernet header length
pub const ETH_HLEN: usize = 14;

/// Minimum Ethernet frame length without FCS
const ETH_ZLEN: usize = 60;

/// Offset of the first TLV
const TLV_OFFSET: usize = ETH_HLEN + 2;

/// OUI that introduces the IEC defined option sub-TLVs
pub const MRP_IEC_OUI: [u8; 3] = [0x08, 0x00, 0x06];

const RING_TEST_LEN: usize = 18;
const RING_TOPO_LEN: usize = 10;
const RING_LINK_LEN: usize = 12;
const COMMON_LEN: usize = 2 + MRP_DOMAIN_UUID_LENGTH;
const IN_TEST_LEN: usize = 18;
const IN_TOPO_LEN: usize = 10;
const IN_LINK_LEN: usize = 12;
const IN_LINK_STATUS_LEN: usize = 10;
const MANAGER_PAIR_LEN: usize = 16;

/// PDU decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated frame: {needed} bytes needed, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown TLV type {0:#04x}")]
    UnknownType(u8),

    #[error("malformed domain UUID in common TLV (length {0})")]
    BadDomain(usize),

    #[error("TLV {kind:#04x} has invalid length {len}")]
    BadLength { kind: u8, len: usize },

    #[error("not an MRP frame (ethertype {0:#06x})")]
    NotMrp(u16),
}

/// TLV type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlvType {
    End = 0x00,
    Common = 0x01,
    RingTest = 0x02,
    RingTopo = 0x03,
    RingLinkDown = 0x04,
    RingLinkUp = 0x05,
    InTest = 0x06,
    InTopo = 0x07,
    InLinkDown = 0x08,
    InLinkUp = 0x09,
    InLinkStatus = 0x0A,
    Option = 0x7F,
}

impl TryFrom<u8> for TlvType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => TlvType::End,
            0x01 => TlvType::Common,
            0x02 => TlvType::RingTest,
            0x03 => TlvType::RingTopo,
            0x04 => TlvType::RingLinkDown,
            0x05 => TlvType::RingLinkUp,
            0x06 => TlvType::InTest,
            0x07 => TlvType::InTopo,
            0x08 => TlvType::InLinkDown,
            0x09 => TlvType::InLinkUp,
            0x0A => TlvType::InLinkStatus,
            0x7F => TlvType::Option,
            other => return Err(DecodeError::UnknownType(other)),
        })
    }
}

/// Option sub-TLV type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubTlvType {
    TestMgrNack = 0x01,
    TestPropagate = 0x02,
    AutoMgr = 0x03,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingTest {
    pub prio: u16,
    pub sa: MacAddr,
    pub port_role: u16,
    pub state: u16,
    pub transitions: u16,
    /// Sender's millisecond counter
    pub timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingTopology {
    pub prio: u16,
    pub sa: MacAddr,
    /// Milliseconds until the sender's FDB flush
    pub interval: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLink {
    pub sa: MacAddr,
    pub port_role: u16,
    pub interval: u16,
    pub blocked: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Common {
    pub seq_id: u16,
    pub domain: DomainId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InTest {
    pub id: u16,
    pub sa: MacAddr,
    pub port_role: u16,
    pub state: u16,
    pub transitions: u16,
    pub timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InTopology {
    pub sa: MacAddr,
    pub id: u16,
    pub interval: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InLink {
    pub sa: MacAddr,
    pub port_role: u16,
    pub id: u16,
    pub interval: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InLinkStatus {
    pub sa: MacAddr,
    pub port_role: u16,
    pub id: u16,
}

/// Body of the manager negotiation sub-TLVs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerPair {
    pub prio: u16,
    pub sa: MacAddr,
    pub other_prio: u16,
    pub other_sa: MacAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubTlv {
    TestMgrNack(ManagerPair),
    TestPropagate(ManagerPair),
    AutoMgr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionBody {
    /// IEC OUI: ED1 header followed by sub-TLVs
    Iec {
        ed1_type: u8,
        manufacturer_data: [u8; 2],
        sub_tlvs: Vec<SubTlv>,
    },
    /// Any other OUI, kept verbatim
    Vendor(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionTlv {
    pub oui: [u8; 3],
    pub body: OptionBody,
}

impl OptionTlv {
    /// IEC option carrying the given sub-TLVs.
    pub fn iec(sub_tlvs: Vec<SubTlv>) -> Self {
        Self {
            oui: MRP_IEC_OUI,
            body: OptionBody::Iec {
                ed1_type: 0,
                manufacturer_data: [0; 2],
                sub_tlvs,
            },
        }
    }

    pub fn sub_tlvs(&self) -> &[SubTlv] {
        match &self.body {
            OptionBody::Iec { sub_tlvs, .. } => sub_tlvs,
            OptionBody::Vendor(_) => &[],
        }
    }

    fn payload_len(&self) -> usize {
        3 + match &self.body {
            OptionBody::Iec { sub_tlvs, .. } => {
                3 + sub_tlvs.iter().map(|s| 2 + s.payload_len()).sum::<usize>()
            }
            OptionBody::Vendor(data) => data.len(),
        }
    }
}

impl SubTlv {
    fn kind(&self) -> SubTlvType {
        match self {
            SubTlv::TestMgrNack(_) => SubTlvType::TestMgrNack,
            SubTlv::TestPropagate(_) => SubTlvType::TestPropagate,
            SubTlv::AutoMgr => SubTlvType::AutoMgr,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            SubTlv::TestMgrNack(_) | SubTlv::TestPropagate(_) => MANAGER_PAIR_LEN,
            SubTlv::AutoMgr => 0,
        }
    }
}

/// A decoded TLV (the End TLV is implicit)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tlv {
    Common(Common),
    RingTest(RingTest),
    RingTopology(RingTopology),
    RingLinkDown(RingLink),
    RingLinkUp(RingLink),
    InTest(InTest),
    InTopology(InTopology),
    InLinkDown(InLink),
    InLinkUp(InLink),
    InLinkStatus(InLinkStatus),
    Option(OptionTlv),
}

impl Tlv {
    pub fn kind(&self) -> TlvType {
        match self {
            Tlv::Common(_) => TlvType::Common,
            Tlv::RingTest(_) => TlvType::RingTest,
            Tlv::RingTopology(_) => TlvType::RingTopo,
            Tlv::RingLinkDown(_) => TlvType::RingLinkDown,
            Tlv::RingLinkUp(_) => TlvType::RingLinkUp,
            Tlv::InTest(_) => TlvType::InTest,
            Tlv::InTopology(_) => TlvType::InTopo,
            Tlv::InLinkDown(_) => TlvType::InLinkDown,
            Tlv::InLinkUp(_) => TlvType::InLinkUp,
            Tlv::InLinkStatus(_) => TlvType::InLinkStatus,
            Tlv::Option(_) => TlvType::Option,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Tlv::Common(_) => COMMON_LEN,
            Tlv::RingTest(_) => RING_TEST_LEN,
            Tlv::RingTopology(_) => RING_TOPO_LEN,
            Tlv::RingLinkDown(_) | Tlv::RingLinkUp(_) => RING_LINK_LEN,
            Tlv::InTest(_) => IN_TEST_LEN,
            Tlv::InTopology(_) => IN_TOPO_LEN,
            Tlv::InLinkDown(_) | Tlv::InLinkUp(_) => IN_LINK_LEN,
            Tlv::InLinkStatus(_) => IN_LINK_STATUS_LEN,
            Tlv::Option(opt) => opt.payload_len(),
        }
    }

    fn emit(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind() as u8);
        buf.put_u8(self.payload_len() as u8);

        match self {
            Tlv::Common(c) => {
                buf.put_u16(c.seq_id);
                buf.put_slice(&c.domain.0);
            }
            Tlv::RingTest(t) => {
                buf.put_u16(t.prio);
                buf.put_slice(t.sa.as_bytes());
                buf.put_u16(t.port_role);
                buf.put_u16(t.state);
                buf.put_u16(t.transitions);
                buf.put_u32(t.timestamp);
            }
            Tlv::RingTopology(t) => {
                buf.put_u16(t.prio);
                buf.put_slice(t.sa.as_bytes());
                buf.put_u16(t.interval);
            }
            Tlv::RingLinkDown(l) | Tlv::RingLinkUp(l) => {
                buf.put_slice(l.sa.as_bytes());
                buf.put_u16(l.port_role);
                buf.put_u16(l.interval);
                buf.put_u16(l.blocked);
            }
            Tlv::InTest(t) => {
                buf.put_u16(t.id);
                buf.put_slice(t.sa.as_bytes());
                buf.put_u16(t.port_role);
                buf.put_u16(t.state);
                buf.put_u16(t.transitions);
                buf.put_u32(t.timestamp);
            }
            Tlv::InTopology(t) => {
                buf.put_slice(t.sa.as_bytes());
                buf.put_u16(t.id);
                buf.put_u16(t.interval);
            }
            Tlv::InLinkDown(l) | Tlv::InLinkUp(l) => {
                buf.put_slice(l.sa.as_bytes());
                buf.put_u16(l.port_role);
                buf.put_u16(l.id);
                buf.put_u16(l.interval);
            }
            Tlv::InLinkStatus(s) => {
                buf.put_slice(s.sa.as_bytes());
                buf.put_u16(s.port_role);
                buf.put_u16(s.id);
            }
            Tlv::Option(opt) => {
                buf.put_slice(&opt.oui);
                match &opt.body {
                    OptionBody::Iec {
                        ed1_type,
                        manufacturer_data,
                        sub_tlvs,
                    } => {
                        buf.put_u8(*ed1_type);
                        buf.put_slice(manufacturer_data);
                        for sub in sub_tlvs {
                            buf.put_u8(sub.kind() as u8);
                            buf.put_u8(sub.payload_len() as u8);
                            if let SubTlv::TestMgrNack(pair) | SubTlv::TestPropagate(pair) = sub {
                                buf.put_u16(pair.prio);
                                buf.put_slice(pair.sa.as_bytes());
                                buf.put_u16(pair.other_prio);
                                buf.put_slice(pair.other_sa.as_bytes());
                            }
                        }
                    }
                    OptionBody::Vendor(data) => buf.put_slice(data),
                }
            }
        }
    }

    fn parse(kind: TlvType, mut payload: &[u8], skipped: &mut Vec<DecodeError>) -> Result<Self, DecodeError> {
        let tlv = match kind {
            TlvType::Common => {
                if payload.len() != COMMON_LEN {
                    return Err(DecodeError::BadDomain(payload.len()));
                }
                let seq_id = payload.get_u16();
                let mut domain = [0u8; MRP_DOMAIN_UUID_LENGTH];
                payload.copy_to_slice(&mut domain);
                Tlv::Common(Common {
                    seq_id,
                    domain: DomainId(domain),
                })
            }
            TlvType::RingTest => {
                expect_len(kind, payload, RING_TEST_LEN)?;
                Tlv::RingTest(RingTest {
                    prio: payload.get_u16(),
                    sa: get_mac(&mut payload),
                    port_role: payload.get_u16(),
                    state: payload.get_u16(),
                    transitions: payload.get_u16(),
                    timestamp: payload.get_u32(),
                })
            }
            TlvType::RingTopo => {
                expect_len(kind, payload, RING_TOPO_LEN)?;
                Tlv::RingTopology(RingTopology {
                    prio: payload.get_u16(),
                    sa: get_mac(&mut payload),
                    interval: payload.get_u16(),
                })
            }
            TlvType::RingLinkDown | TlvType::RingLinkUp => {
                expect_len(kind, payload, RING_LINK_LEN)?;
                let link = RingLink {
                    sa: get_mac(&mut payload),
                    port_role: payload.get_u16(),
                    interval: payload.get_u16(),
                    blocked: payload.get_u16(),
                };
                if kind == TlvType::RingLinkDown {
                    Tlv::RingLinkDown(link)
                } else {
                    Tlv::RingLinkUp(link)
                }
            }
            TlvType::InTest => {
                expect_len(kind, payload, IN_TEST_LEN)?;
                Tlv::InTest(InTest {
                    id: payload.get_u16(),
                    sa: get_mac(&mut payload),
                    port_role: payload.get_u16(),
                    state: payload.get_u16(),
                    transitions: payload.get_u16(),
                    timestamp: payload.get_u32(),
                })
            }
            TlvType::InTopo => {
                expect_len(kind, payload, IN_TOPO_LEN)?;
                Tlv::InTopology(InTopology {
                    sa: get_mac(&mut payload),
                    id: payload.get_u16(),
                    interval: payload.get_u16(),
                })
            }
            TlvType::InLinkDown | TlvType::InLinkUp => {
                expect_len(kind, payload, IN_LINK_LEN)?;
                let link = InLink {
                    sa: get_mac(&mut payload),
                    port_role: payload.get_u16(),
                    id: payload.get_u16(),
                    interval: payload.get_u16(),
                };
                if kind == TlvType::InLinkDown {
                    Tlv::InLinkDown(link)
                } else {
                    Tlv::InLinkUp(link)
                }
            }
            TlvType::InLinkStatus => {
                expect_len(kind, payload, IN_LINK_STATUS_LEN)?;
                Tlv::InLinkStatus(InLinkStatus {
                    sa: get_mac(&mut payload),
                    port_role: payload.get_u16(),
                    id: payload.get_u16(),
                })
            }
            TlvType::Option => Tlv::Option(parse_option(payload, skipped)?),
            TlvType::End => unreachable!("End TLV terminates parsing"),
        };

        Ok(tlv)
    }
}

fn expect_len(kind: TlvType, payload: &[u8], len: usize) -> Result<(), DecodeError> {
    if payload.len() != len {
        return Err(DecodeError::BadLength {
            kind: kind as u8,
            len: payload.len(),
        });
    }
    Ok(())
}

fn get_mac(buf: &mut &[u8]) -> MacAddr {
    let mut mac = [0u8; 6];
    buf.copy_to_slice(&mut mac);
    MacAddr(mac)
}

fn parse_option(mut payload: &[u8], skipped: &mut Vec<DecodeError>) -> Result<OptionTlv, DecodeError> {
    if payload.len() < 3 {
        return Err(DecodeError::BadLength {
            kind: TlvType::Option as u8,
            len: payload.len(),
        });
    }

    let mut oui = [0u8; 3];
    payload.copy_to_slice(&mut oui);

    if oui != MRP_IEC_OUI {
        return Ok(OptionTlv {
            oui,
            body: OptionBody::Vendor(payload.to_vec()),
        });
    }

    if payload.len() < 3 {
        return Err(DecodeError::BadLength {
            kind: TlvType::Option as u8,
            len: payload.len() + 3,
        });
    }
    let ed1_type = payload.get_u8();
    let manufacturer_data = [payload.get_u8(), payload.get_u8()];

    let mut sub_tlvs = Vec::new();
    while !payload.is_empty() {
        if payload.len() < 2 {
            return Err(DecodeError::Truncated {
                needed: 2,
                available: payload.len(),
            });
        }
        let kind = payload.get_u8();
        let len = payload.get_u8() as usize;
        if payload.len() < len {
            return Err(DecodeError::Truncated {
                needed: len,
                available: payload.len(),
            });
        }
        let (mut body, rest) = payload.split_at(len);
        payload = rest;

        let pair_len_ok = len == MANAGER_PAIR_LEN;
        match kind {
            k if k == SubTlvType::TestMgrNack as u8 || k == SubTlvType::TestPropagate as u8 => {
                if !pair_len_ok {
                    return Err(DecodeError::BadLength { kind, len });
                }
                let pair = ManagerPair {
                    prio: body.get_u16(),
                    sa: get_mac(&mut body),
                    other_prio: body.get_u16(),
                    other_sa: get_mac(&mut body),
                };
                sub_tlvs.push(if k == SubTlvType::TestMgrNack as u8 {
                    SubTlv::TestMgrNack(pair)
                } else {
                    SubTlv::TestPropagate(pair)
                });
            }
            k if k == SubTlvType::AutoMgr as u8 => sub_tlvs.push(SubTlv::AutoMgr),
            other => skipped.push(DecodeError::UnknownType(other)),
        }
    }

    Ok(OptionTlv {
        oui,
        body: OptionBody::Iec {
            ed1_type,
            manufacturer_data,
            sub_tlvs,
        },
    })
}

/// A complete MRP frame including its Ethernet addressing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrpFrame {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub version: u16,
    pub tlvs: Vec<Tlv>,
}

impl MrpFrame {
    pub fn new(dst: MacAddr, src: MacAddr, tlvs: Vec<Tlv>) -> Self {
        Self {
            dst,
            src,
            version: MRP_VERSION,
            tlvs,
        }
    }

    /// The frame's leading TLV, which determines its kind.
    pub fn first(&self) -> Option<&Tlv> {
        self.tlvs.first()
    }

    pub fn common(&self) -> Option<&Common> {
        self.tlvs.iter().find_map(|tlv| match tlv {
            Tlv::Common(c) => Some(c),
            _ => None,
        })
    }

    pub fn option(&self) -> Option<&OptionTlv> {
        self.tlvs.iter().find_map(|tlv| match tlv {
            Tlv::Option(o) => Some(o),
            _ => None,
        })
    }

    /// Serialize the frame, padded to the Ethernet minimum.
    pub fn encode(&self) -> Bytes {
        let len = TLV_OFFSET
            + self.tlvs.iter().map(|t| 2 + t.payload_len()).sum::<usize>()
            + 2;
        let mut buf = BytesMut::with_capacity(len.max(ETH_ZLEN));

        buf.put_slice(self.dst.as_bytes());
        buf.put_slice(self.src.as_bytes());
        buf.put_u16(MRP_ETHERTYPE);
        buf.put_u16(self.version);

        for tlv in &self.tlvs {
            tlv.emit(&mut buf);
        }

        buf.put_u8(TlvType::End as u8);
        buf.put_u8(0);

        if buf.len() < ETH_ZLEN {
            buf.resize(ETH_ZLEN, 0);
        }

        buf.freeze()
    }
}

/// Encode a frame. See [`MrpFrame::encode`].
pub fn encode(frame: &MrpFrame) -> Bytes {
    frame.encode()
}

/// Decode a frame, logging and dropping non-fatal diagnostics.
pub fn decode(data: &[u8]) -> Result<MrpFrame, DecodeError> {
    let (frame, skipped) = decode_with_diagnostics(data)?;
    for diag in skipped {
        debug!(error = %diag, "skipped part of MRP frame");
    }
    Ok(frame)
}

/// Decode a frame and return the non-fatal diagnostics (skipped unknown
/// TLVs and sub-TLVs) alongside it.
pub fn decode_with_diagnostics(data: &[u8]) -> Result<(MrpFrame, Vec<DecodeError>), DecodeError> {
    if data.len() < TLV_OFFSET {
        return Err(DecodeError::Truncated {
            needed: TLV_OFFSET,
            available: data.len(),
        });
    }

    let mut buf = data;
    let dst = get_mac(&mut buf);
    let src = get_mac(&mut buf);
    let ethertype = buf.get_u16();
    if ethertype != MRP_ETHERTYPE {
        return Err(DecodeError::NotMrp(ethertype));
    }
    let version = buf.get_u16();

    let mut tlvs = Vec::new();
    let mut skipped = Vec::new();

    loop {
        if buf.len() < 2 {
            return Err(DecodeError::Truncated {
                needed: 2,
                available: buf.len(),
            });
        }
        let kind = buf.get_u8();
        let len = buf.get_u8() as usize;
        if buf.len() < len {
            return Err(DecodeError::Truncated {
                needed: len,
                available: buf.len(),
            });
        }
        let (payload, rest) = buf.split_at(len);
        buf = rest;

        match TlvType::try_from(kind) {
            Ok(TlvType::End) => break,
            Ok(kind) => tlvs.push(Tlv::parse(kind, payload, &mut skipped)?),
            Err(unknown) => skipped.push(unknown),
        }
    }

    Ok((
        MrpFrame {
            dst,
            src,
            version,
            tlvs,
        },
        skipped,
    ))
}
