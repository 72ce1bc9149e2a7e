//! Kernel bridge offload interface.
//!
//! The kernel bridge is authoritative for forwarding; the ring state machine
//! pushes every role, ring state and port state change through this trait.

use crate::types::{PortRole, PortState, RingKey, RingRole, RingState};
use common::Result;
use std::time::Duration;

/// Operations the kernel bridge offers for MRP rings.
///
/// Every call is a synchronous request/acknowledge exchange. Failures are
/// reported to the caller, which logs them and keeps its logical state.
#[cfg_attr(test, mockall::automock)]
pub trait Offload: Send {
    /// Create the ring in the bridge.
    fn create_ring(&mut self, ring: RingKey, primary: u32, secondary: u32, priority: u16) -> Result<()>;

    /// Remove the ring from the bridge.
    fn delete_ring(&mut self, ring: RingKey) -> Result<()>;

    fn set_ring_role(&mut self, ring: RingKey, role: RingRole) -> Result<()>;

    fn set_ring_state(&mut self, ring: RingKey, state: RingState) -> Result<()>;

    fn set_port_role(&mut self, ring: RingKey, port: u32, role: PortRole) -> Result<()>;

    fn set_port_state(&mut self, port: u32, state: PortState) -> Result<()>;

    /// Let the bridge generate ring test frames. A zero `interval` stops
    /// generation.
    fn send_ring_test(
        &mut self,
        ring: RingKey,
        interval: Duration,
        max_miss: u32,
        period: Duration,
    ) -> Result<()>;

    /// Flush the forwarding database entries learned on `port`.
    fn flush_fdb(&mut self, port: u32) -> Result<()>;
}
