//! Kernel bridge offload over rtnetlink.

use common::Result;
use mrp::Offload;
use mrp::types::{PortRole, PortState, RingKey, RingRole, RingState};
use std::time::Duration;
use tracing::debug;

use crate::messages::BridgeRequest;
use crate::netlink::NetlinkSocket;

/// [`Offload`] backed by the kernel bridge's MRP support.
pub struct NetlinkOffload {
    socket: NetlinkSocket,
}

impl NetlinkOffload {
    pub fn new() -> Result<Self> {
        Ok(Self {
            socket: NetlinkSocket::new()?,
        })
    }
}

impl Offload for NetlinkOffload {
    fn create_ring(&mut self, ring: RingKey, primary: u32, secondary: u32, priority: u16) -> Result<()> {
        debug!(%ring, primary, secondary, priority, "Offload create ring");
        self.socket
            .request(BridgeRequest::add_ring(ring, primary, secondary, priority))
    }

    fn delete_ring(&mut self, ring: RingKey) -> Result<()> {
        debug!(%ring, "Offload delete ring");
        self.socket.request(BridgeRequest::delete_ring(ring))
    }

    fn set_ring_role(&mut self, ring: RingKey, role: RingRole) -> Result<()> {
        debug!(%ring, ?role, "Offload ring role");
        self.socket.request(BridgeRequest::ring_role(ring, role))
    }

    fn set_ring_state(&mut self, ring: RingKey, state: RingState) -> Result<()> {
        debug!(%ring, ?state, "Offload ring state");
        self.socket.request(BridgeRequest::ring_state(ring, state))
    }

    fn set_port_role(&mut self, ring: RingKey, port: u32, role: PortRole) -> Result<()> {
        // the kernel keeps the role on the port, the ring is implied
        debug!(%ring, port, ?role, "Offload port role");
        self.socket.request(BridgeRequest::port_role(port, role))
    }

    fn set_port_state(&mut self, port: u32, state: PortState) -> Result<()> {
        debug!(port, ?state, "Offload port state");
        self.socket.request(BridgeRequest::port_state(port, state))
    }

    fn send_ring_test(
        &mut self,
        ring: RingKey,
        interval: Duration,
        max_miss: u32,
        period: Duration,
    ) -> Result<()> {
        debug!(%ring, ?interval, max_miss, ?period, "Offload ring test");
        self.socket
            .request(BridgeRequest::start_test(ring, interval, max_miss, period))
    }

    fn flush_fdb(&mut self, port: u32) -> Result<()> {
        debug!(port, "Offload FDB flush");
        self.socket.request(BridgeRequest::flush(port))
    }
}
