//! Link state notifications from `RTMGRP_LINK`.

use netlink_packet_core::NetlinkBuffer;
use netlink_packet_utils::nla::NlasIterator;
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use tracing::{trace, warn};

use mrp::types::MacAddr;

use crate::messages::{IFINFOMSG_LEN, IFLA_ADDRESS, IFLA_OPERSTATE, RTM_DELLINK, RTM_NEWLINK};

const RTMGRP_LINK: u32 = 1;
const IF_OPER_UP: u8 = 6;

/// A change to one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub ifindex: u32,
    pub up: bool,
    pub mac: Option<MacAddr>,
    pub removed: bool,
}

/// Non-blocking subscriber to kernel link notifications.
pub struct LinkMonitor {
    socket: Socket,
}

impl LinkMonitor {
    pub fn new() -> io::Result<Self> {
        let mut socket = Socket::new(NETLINK_ROUTE)?;
        socket.bind(&SocketAddr::new(0, RTMGRP_LINK))?;
        socket.set_non_blocking(true)?;
        Ok(Self { socket })
    }

    /// Drain every pending notification.
    pub fn recv_events(&mut self) -> io::Result<Vec<LinkEvent>> {
        let mut events = Vec::new();
        loop {
            match self.socket.recv_from_full() {
                Ok((buf, _)) => events.extend(parse_link_messages(&buf)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(events),
                Err(e) => return Err(e),
            }
        }
    }
}

impl AsRawFd for LinkMonitor {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

/// Parse the `RTM_NEWLINK`/`RTM_DELLINK` messages of one datagram.
pub fn parse_link_messages(buf: &[u8]) -> Vec<LinkEvent> {
    let mut events = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let message = match NetlinkBuffer::new_checked(&buf[offset..]) {
            Ok(message) => message,
            Err(e) => {
                warn!("Malformed link notification: {}", e);
                break;
            }
        };
        let len = message.length() as usize;
        if len == 0 {
            break;
        }

        let kind = message.message_type();
        if kind == RTM_NEWLINK || kind == RTM_DELLINK {
            match parse_ifinfo(message.payload()) {
                Some(mut event) => {
                    event.removed = kind == RTM_DELLINK;
                    trace!(?event, "Link notification");
                    events.push(event);
                }
                None => warn!("Short link notification"),
            }
        }

        // messages are 4 byte aligned
        offset += (len + 3) & !3;
    }
    events
}

fn parse_ifinfo(payload: &[u8]) -> Option<LinkEvent> {
    if payload.len() < IFINFOMSG_LEN {
        return None;
    }
    let ifindex = i32::from_ne_bytes(payload[4..8].try_into().ok()?) as u32;
    let flags = u32::from_ne_bytes(payload[8..12].try_into().ok()?);

    let mut operstate = None;
    let mut mac = None;
    for nla in NlasIterator::new(&payload[IFINFOMSG_LEN..]).flatten() {
        match nla.kind() {
            IFLA_OPERSTATE => operstate = nla.value().first().copied(),
            IFLA_ADDRESS => {
                if let Ok(octets) = <[u8; 6]>::try_from(nla.value()) {
                    mac = Some(MacAddr(octets));
                }
            }
            _ => {}
        }
    }

    let up = match operstate {
        Some(state) => state == IF_OPER_UP,
        None => flags & libc::IFF_RUNNING as u32 != 0,
    };

    Some(LinkEvent {
        ifindex,
        up,
        mac,
        removed: false,
    })
}
