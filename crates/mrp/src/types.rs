//! MRP data types and constants.
//!
//! Based on IEC 62439-2: Media Redundancy Protocol (MRP)

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// MRP EtherType
pub const MRP_ETHERTYPE: u16 = 0x88E3;

/// MRP PDU version
pub const MRP_VERSION: u16 = 1;

/// Destination address of ring test frames
pub const MRP_TEST_DMAC: MacAddr = MacAddr([0x01, 0x15, 0x4E, 0x00, 0x00, 0x01]);

/// Destination address of ring control frames (topology change, link change)
pub const MRP_CONTROL_DMAC: MacAddr = MacAddr([0x01, 0x15, 0x4E, 0x00, 0x00, 0x02]);

/// Default manager priority
pub const MRP_DEFAULT_PRIO: u16 = 0x8000;

/// Length of the domain UUID carried in the common TLV
pub const MRP_DOMAIN_UUID_LENGTH: usize = 16;

/// Upper bound on instances reported by one status query
pub const MAX_MRP_INSTANCES: usize = 64;

/// Ethernet MAC address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// MRP domain identifier (UUID).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainId(pub [u8; MRP_DOMAIN_UUID_LENGTH]);

impl Default for DomainId {
    /// The default domain is all ones.
    fn default() -> Self {
        Self([0xFF; MRP_DOMAIN_UUID_LENGTH])
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for DomainId {
    type Err = String;

    /// Parse the textual UUID form; dashes are optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: Vec<u8> = s.bytes().filter(|b| *b != b'-').collect();
        if hex.len() != MRP_DOMAIN_UUID_LENGTH * 2 {
            return Err(format!("domain UUID must have 32 hex digits: {s}"));
        }

        let mut out = [0u8; MRP_DOMAIN_UUID_LENGTH];
        for (i, pair) in hex.chunks(2).enumerate() {
            let text = std::str::from_utf8(pair).map_err(|e| e.to_string())?;
            out[i] = u8::from_str_radix(text, 16)
                .map_err(|_| format!("invalid hex digits '{text}' in domain UUID"))?;
        }
        Ok(Self(out))
    }
}

/// Identity of a ring instance: bridge interface index and ring number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RingKey {
    pub bridge: u32,
    pub ring_nr: u32,
}

impl RingKey {
    pub fn new(bridge: u32, ring_nr: u32) -> Self {
        Self { bridge, ring_nr }
    }
}

impl fmt::Display for RingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bridge, self.ring_nr)
    }
}

/// Configured ring role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u32)]
pub enum RingRole {
    Disabled = 0,
    Mrc = 1,
    Mrm = 2,
    Mra = 3,
}

impl fmt::Display for RingRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingRole::Disabled => write!(f, "Disabled"),
            RingRole::Mrc => write!(f, "MRC"),
            RingRole::Mrm => write!(f, "MRM"),
            RingRole::Mra => write!(f, "MRA"),
        }
    }
}

impl TryFrom<u32> for RingRole {
    type Error = crate::registry::AddError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RingRole::Disabled),
            1 => Ok(RingRole::Mrc),
            2 => Ok(RingRole::Mrm),
            3 => Ok(RingRole::Mra),
            other => Err(crate::registry::AddError::InvalidRole(other.to_string())),
        }
    }
}

impl FromStr for RingRole {
    type Err = crate::registry::AddError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" => Ok(RingRole::Disabled),
            "mrc" => Ok(RingRole::Mrc),
            "mrm" => Ok(RingRole::Mrm),
            "mra" => Ok(RingRole::Mra),
            _ => Err(crate::registry::AddError::InvalidRole(s.to_string())),
        }
    }
}

/// Ring state as pushed to the kernel and carried in test frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u16)]
pub enum RingState {
    Open = 0,
    Closed = 1,
}

impl fmt::Display for RingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingState::Open => write!(f, "Open"),
            RingState::Closed => write!(f, "Closed"),
        }
    }
}

/// Ring port role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u16)]
pub enum PortRole {
    Primary = 0,
    Secondary = 1,
}

impl PortRole {
    /// The other ring port.
    pub fn other(self) -> PortRole {
        match self {
            PortRole::Primary => PortRole::Secondary,
            PortRole::Secondary => PortRole::Primary,
        }
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRole::Primary => write!(f, "primary"),
            PortRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// Forwarding state of a ring port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u32)]
pub enum PortState {
    Blocked = 0,
    Forwarding = 1,
    Disabled = 2,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Blocked => write!(f, "blocked"),
            PortState::Forwarding => write!(f, "forwarding"),
            PortState::Disabled => write!(f, "disabled"),
        }
    }
}

/// Manager sub-states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u32)]
pub enum MrmState {
    /// Waiting for a ring port link
    AcStat1 = 0,
    /// One ring port up, waiting for test frames to return
    PrmUp = 1,
    /// Ring open, both ports forwarding
    ChkRo = 2,
    /// Ring closed, secondary port blocked
    ChkRc = 3,
}

impl fmt::Display for MrmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MrmState::AcStat1 => write!(f, "AC_STAT1"),
            MrmState::PrmUp => write!(f, "PRM_UP"),
            MrmState::ChkRo => write!(f, "CHK_RO"),
            MrmState::ChkRc => write!(f, "CHK_RC"),
        }
    }
}

impl TryFrom<u32> for MrmState {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MrmState::AcStat1),
            1 => Ok(MrmState::PrmUp),
            2 => Ok(MrmState::ChkRo),
            3 => Ok(MrmState::ChkRc),
            other => Err(other),
        }
    }
}

/// Client sub-states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u32)]
pub enum MrcState {
    /// No ring port link
    AcStat1 = 0,
    /// One ring port up
    DeIdle = 1,
    /// Both ports up, second port blocked until the ring is confirmed
    Pt = 2,
    /// Link down announced, waiting for the burst to finish
    De = 3,
    /// Both ports up and forwarding
    PtIdle = 4,
}

impl fmt::Display for MrcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MrcState::AcStat1 => write!(f, "AC_STAT1"),
            MrcState::DeIdle => write!(f, "DE_IDLE"),
            MrcState::Pt => write!(f, "PT"),
            MrcState::De => write!(f, "DE"),
            MrcState::PtIdle => write!(f, "PT_IDLE"),
        }
    }
}

impl TryFrom<u32> for MrcState {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MrcState::AcStat1),
            1 => Ok(MrcState::DeIdle),
            2 => Ok(MrcState::Pt),
            3 => Ok(MrcState::De),
            4 => Ok(MrcState::PtIdle),
            other => Err(other),
        }
    }
}

/// Ring recovery profile (maximum recovery time class).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryProfile {
    #[default]
    Ms500,
    Ms200,
    Ms30,
    Ms10,
}

impl RecoveryProfile {
    /// Timer configuration of this profile.
    pub fn timings(self) -> RecoveryTimings {
        match self {
            RecoveryProfile::Ms500 => RecoveryTimings {
                topo_interval: Duration::from_millis(20),
                topo_max: 3,
                test_short_interval: Duration::from_millis(30),
                test_interval: Duration::from_millis(50),
                test_short_max: 4,
                test_max: 5,
                test_ext_max: 15,
                link_interval: Duration::from_millis(100),
                link_max: 4,
            },
            RecoveryProfile::Ms200 => RecoveryTimings {
                topo_interval: Duration::from_millis(10),
                topo_max: 3,
                test_short_interval: Duration::from_millis(10),
                test_interval: Duration::from_millis(20),
                test_short_max: 2,
                test_max: 3,
                test_ext_max: 15,
                link_interval: Duration::from_millis(20),
                link_max: 4,
            },
            RecoveryProfile::Ms30 => RecoveryTimings {
                topo_interval: Duration::from_micros(500),
                topo_max: 3,
                test_short_interval: Duration::from_millis(1),
                test_interval: Duration::from_micros(3500),
                test_short_max: 2,
                test_max: 3,
                test_ext_max: 15,
                link_interval: Duration::from_millis(1),
                link_max: 4,
            },
            RecoveryProfile::Ms10 => RecoveryTimings {
                topo_interval: Duration::from_micros(500),
                topo_max: 3,
                test_short_interval: Duration::from_micros(500),
                test_interval: Duration::from_millis(1),
                test_short_max: 2,
                test_max: 3,
                test_ext_max: 15,
                link_interval: Duration::from_millis(1),
                link_max: 4,
            },
        }
    }
}

impl fmt::Display for RecoveryProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryProfile::Ms500 => write!(f, "500ms"),
            RecoveryProfile::Ms200 => write!(f, "200ms"),
            RecoveryProfile::Ms30 => write!(f, "30ms"),
            RecoveryProfile::Ms10 => write!(f, "10ms"),
        }
    }
}

impl FromStr for RecoveryProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "500ms" | "500" => Ok(RecoveryProfile::Ms500),
            "200ms" | "200" => Ok(RecoveryProfile::Ms200),
            "30ms" | "30" => Ok(RecoveryProfile::Ms30),
            "10ms" | "10" => Ok(RecoveryProfile::Ms10),
            other => Err(format!("unknown recovery profile: {other}")),
        }
    }
}

/// Test-loss budget tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestTier {
    /// Fast detection right after a ring port came up
    Short,
    /// Steady state
    #[default]
    Default,
    /// Tolerant window while manager contention is being resolved
    Extended,
}

/// Timer configuration of a ring instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryTimings {
    /// Spacing of topology change frames
    pub topo_interval: Duration,
    /// Number of topology change frames per request
    pub topo_max: u32,
    /// Ring test period right after a port came up
    pub test_short_interval: Duration,
    /// Steady state ring test period
    pub test_interval: Duration,
    /// Missed tests tolerated in the short tier
    pub test_short_max: u32,
    /// Missed tests tolerated in the default tier
    pub test_max: u32,
    /// Missed tests tolerated in the extended tier
    pub test_ext_max: u32,
    /// Spacing of link change frames
    pub link_interval: Duration,
    /// Number of link change frames per burst
    pub link_max: u32,
}

impl RecoveryTimings {
    /// Consecutive-miss budget of a tier.
    pub fn test_budget(&self, tier: TestTier) -> u32 {
        match tier {
            TestTier::Short => self.test_short_max,
            TestTier::Default => self.test_max,
            TestTier::Extended => self.test_ext_max,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let intervals = [
            ("topo_interval", self.topo_interval),
            ("test_short_interval", self.test_short_interval),
            ("test_interval", self.test_interval),
            ("link_interval", self.link_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(format!("{name} must be greater than zero"));
            }
        }

        if self.topo_max == 0 || self.link_max == 0 {
            return Err("topology and link repeat counts must be at least 1".to_string());
        }

        if self.test_short_max == 0 || self.test_max == 0 || self.test_ext_max == 0 {
            return Err("test budgets must be at least 1".to_string());
        }

        Ok(())
    }
}

impl Default for RecoveryTimings {
    fn default() -> Self {
        RecoveryProfile::default().timings()
    }
}

/// Daemon wide defaults applied to every new ring instance
#[derive(Debug, Clone, Default)]
pub struct RingDefaults {
    pub recovery: RecoveryProfile,
    /// Overrides the profile's timings when set
    pub timings: Option<RecoveryTimings>,
    pub domain: DomainId,
    /// Ask the kernel to generate ring test frames
    pub hw_test_offload: bool,
}

impl RingDefaults {
    pub fn timings(&self) -> RecoveryTimings {
        self.timings.unwrap_or_else(|| self.recovery.timings())
    }
}

/// Active sub-state, as reported by status queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SubState {
    None,
    Mrm(MrmState),
    Mrc(MrcState),
}

impl SubState {
    pub fn as_u32(&self) -> u32 {
        match self {
            SubState::None => 0,
            SubState::Mrm(state) => *state as u32,
            SubState::Mrc(state) => *state as u32,
        }
    }
}

impl fmt::Display for SubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubState::None => write!(f, "-"),
            SubState::Mrm(state) => state.fmt(f),
            SubState::Mrc(state) => state.fmt(f),
        }
    }
}

/// Snapshot of a ring instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RingStatus {
    pub bridge: u32,
    pub ring_nr: u32,
    pub primary: u32,
    pub secondary: u32,
    /// Role the instance currently behaves as
    pub role: RingRole,
    pub priority: u16,
    pub mra_capable: bool,
    pub state: SubState,
}

/// Per-instance statistics
#[derive(Debug, Clone, Default)]
pub struct RingStats {
    pub test_sent: u64,
    pub test_received: u64,
    pub foreign_test_received: u64,
    pub topology_sent: u64,
    pub topology_received: u64,
    pub link_sent: u64,
    pub link_received: u64,
    pub ring_open_count: u64,
    pub fdb_flushes: u64,
    pub offload_failures: u64,
    pub send_failures: u64,
    /// Loop time of the last own test frame that came back
    pub last_round_trip: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("mrm".parse::<RingRole>().unwrap(), RingRole::Mrm);
        assert_eq!("MRC".parse::<RingRole>().unwrap(), RingRole::Mrc);
        assert_eq!("mra".parse::<RingRole>().unwrap(), RingRole::Mra);
        assert!("manager".parse::<RingRole>().is_err());
        assert_eq!(RingRole::try_from(2).unwrap(), RingRole::Mrm);
        assert!(RingRole::try_from(7).is_err());
    }

    #[test]
    fn test_domain_roundtrip_text() {
        let domain: DomainId = "ffffffff-ffff-ffff-ffff-ffffffffffff".parse().unwrap();
        assert_eq!(domain, DomainId::default());

        let text = "00112233-4455-6677-8899-aabbccddeeff";
        let domain: DomainId = text.parse().unwrap();
        assert_eq!(domain.0[0], 0x00);
        assert_eq!(domain.0[15], 0xff);
        assert_eq!(domain.to_string(), text);

        assert!("0011".parse::<DomainId>().is_err());
        assert!("zz112233-4455-6677-8899-aabbccddeeff".parse::<DomainId>().is_err());
    }

    #[test]
    fn test_profile_timings_are_valid() {
        for profile in [
            RecoveryProfile::Ms500,
            RecoveryProfile::Ms200,
            RecoveryProfile::Ms30,
            RecoveryProfile::Ms10,
        ] {
            let timings = profile.timings();
            assert!(timings.validate().is_ok(), "{profile}");
            assert!(timings.test_short_interval <= timings.test_interval);
            assert!(timings.test_budget(TestTier::Short) <= timings.test_budget(TestTier::Default));
            assert!(timings.test_budget(TestTier::Default) < timings.test_budget(TestTier::Extended));
        }
    }

    #[test]
    fn test_state_names() {
        assert_eq!(MrmState::ChkRo.to_string(), "CHK_RO");
        assert_eq!(MrcState::PtIdle.to_string(), "PT_IDLE");
        assert_eq!(SubState::Mrm(MrmState::ChkRc).as_u32(), 3);
        assert_eq!(MacAddr([0, 0x15, 0x4e, 1, 2, 0xff]).to_string(), "00:15:4e:01:02:ff");
    }
}
