//! Frame transport and interface lookup interfaces.

use crate::types::MacAddr;
use std::io;

/// Transmits raw Ethernet frames on an interface.
///
/// Sending is fire-and-forget: implementations never block and report short
/// writes as errors, which callers log without retrying.
pub trait FrameSender: Send + Sync {
    fn send(&self, ifindex: u32, frame: &[u8]) -> io::Result<()>;
}

/// Read-only view of the host's network interfaces.
pub trait InterfaceInfo: Send + Sync {
    /// Hardware address, or `None` if the interface does not exist.
    fn mac_address(&self, ifindex: u32) -> Option<MacAddr>;

    /// Whether the interface is operationally up.
    fn is_up(&self, ifindex: u32) -> bool;
}
