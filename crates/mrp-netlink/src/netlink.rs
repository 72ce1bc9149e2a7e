//! rtnetlink request socket.
//!
//! Bridge MRP requests are sent with `NLM_F_ACK` and every call blocks
//! until the kernel acknowledges or rejects it.

use bytes::BytesMut;
use common::{Error, Result};
use netlink_packet_core::{
    NLM_F_ACK, NLM_F_REQUEST, NetlinkBuffer, NetlinkHeader, NetlinkMessage, NetlinkPayload,
};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
use std::io;
use tracing::{debug, trace};

use crate::messages::BridgeRequest;

/// Netlink socket wrapper for bridge link requests.
pub struct NetlinkSocket {
    socket: Socket,
    sequence: u32,
}

impl NetlinkSocket {
    pub fn new() -> Result<Self> {
        debug!("Creating rtnetlink socket for MRP offload");

        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| Error::netlink(format!("Failed to create netlink socket: {}", e)))?;

        socket
            .bind(&SocketAddr::new(0, 0))
            .map_err(|e| Error::netlink(format!("Failed to bind netlink socket: {}", e)))?;

        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| Error::netlink(format!("Failed to connect netlink socket: {}", e)))?;

        Ok(Self {
            socket,
            sequence: 0,
        })
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    fn send_message(&mut self, message: &NetlinkMessage<BridgeRequest>) -> Result<()> {
        let mut buf = BytesMut::zeroed(message.buffer_len());
        message.serialize(&mut buf[..]);

        trace!("Sending netlink message: {:?}", message);

        self.socket
            .send(&buf[..], 0)
            .map_err(|e| Error::netlink(format!("Failed to send netlink message: {}", e)))?;

        Ok(())
    }

    /// Wait for the ack matching `sequence`.
    fn receive_ack(&mut self, sequence: u32) -> Result<()> {
        loop {
            let (buf, _) = self
                .socket
                .recv_from_full()
                .map_err(|e| Error::netlink(format!("Failed to receive netlink message: {}", e)))?;

            let mut offset = 0;
            while offset < buf.len() {
                let len = NetlinkBuffer::new_checked(&buf[offset..])
                    .map_err(|e| Error::netlink(format!("Failed to parse netlink header: {}", e)))?
                    .length() as usize;
                if len == 0 {
                    break;
                }

                let message =
                    NetlinkMessage::<BridgeRequest>::deserialize(&buf[offset..offset + len])
                        .map_err(|e| {
                            Error::netlink(format!("Failed to parse netlink message: {}", e))
                        })?;
                offset += len;

                trace!("Received netlink message: {:?}", message);

                if message.header.sequence_number != sequence {
                    continue;
                }
                if let NetlinkPayload::Error(err) = message.payload {
                    return match err.code {
                        None => Ok(()),
                        Some(code) => Err(Error::netlink(io::Error::from_raw_os_error(
                            -code.get(),
                        ))),
                    };
                }
            }
        }
    }

    /// Send a bridge request and wait for the kernel's verdict.
    pub fn request(&mut self, request: BridgeRequest) -> Result<()> {
        let mut message = NetlinkMessage::new(
            NetlinkHeader::default(),
            NetlinkPayload::InnerMessage(request),
        );
        message.header.flags = NLM_F_REQUEST | NLM_F_ACK;
        message.header.sequence_number = self.next_sequence();
        message.finalize();

        let sequence = message.header.sequence_number;
        self.send_message(&message)?;
        self.receive_ack(sequence)
    }
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        trace!("Closing netlink socket");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrp::types::PortState;

    #[test]
    fn test_unknown_port_is_rejected() {
        // Requires CAP_NET_ADMIN
        if std::env::var("MRP_TEST_ENABLED").is_err() {
            eprintln!("Skipping test_unknown_port_is_rejected (requires MRP_TEST_ENABLED=1)");
            return;
        }

        let mut socket = NetlinkSocket::new().expect("netlink socket");
        let result = socket.request(BridgeRequest::port_state(0x7fff_fff0, PortState::Blocked));
        assert!(matches!(result, Err(Error::Netlink(_))));
    }
}
