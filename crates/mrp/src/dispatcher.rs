//! Received frame dispatch.

use crate::pdu;
use crate::registry::Registry;
use crate::types::MacAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// What happened to a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Delivered,
    /// Sent by this host on the same interface
    Loopback,
    Malformed,
    /// No ring owns the receiving interface
    Unowned,
}

/// Dispatch counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub delivered: u64,
    pub loopback: u64,
    pub malformed: u64,
    pub unowned: u64,
}

/// Routes raw frames from the packet socket to ring instances.
pub struct Dispatcher {
    registry: Arc<Registry>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Handle one frame received on `ifindex` from `sender`.
    pub async fn on_frame(
        &mut self,
        ifindex: u32,
        sender: MacAddr,
        data: &[u8],
        now: Instant,
    ) -> Disposition {
        self.stats.received += 1;

        if self.registry.port_mac(ifindex).await == Some(sender) {
            trace!(ifindex, "Dropping own frame");
            self.stats.loopback += 1;
            return Disposition::Loopback;
        }

        let frame = match pdu::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(ifindex, %sender, error = %e, "Dropping malformed MRP frame");
                self.stats.malformed += 1;
                return Disposition::Malformed;
            }
        };

        if self.registry.deliver(ifindex, &frame, now).await {
            self.stats.delivered += 1;
            Disposition::Delivered
        } else {
            trace!(ifindex, "No ring on interface");
            self.stats.unowned += 1;
            Disposition::Unowned
        }
    }
}
