//! Raw packet socket carrying MRP frames.
//!
//! One `AF_PACKET` socket serves every ring port. A classic BPF program
//! keeps everything but EtherType 0x88E3 in the kernel, and outgoing frames
//! are not looped back.

use mrp::FrameSender;
use mrp::types::MRP_ETHERTYPE;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::mem;
use std::os::fd::{AsRawFd, RawFd};
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

/// `SOL_PACKET` option, missing from older libc releases
const PACKET_IGNORE_OUTGOING: libc::c_int = 23;

const MRP_SOCKET_PRIORITY: libc::c_int = 7;

/// `ldh [12]; jeq #0x88e3, accept, drop`
pub const MRP_FILTER: [libc::sock_filter; 4] = [
    libc::sock_filter {
        code: 0x28,
        jt: 0,
        jf: 0,
        k: 12,
    },
    libc::sock_filter {
        code: 0x15,
        jt: 0,
        jf: 1,
        k: MRP_ETHERTYPE as u32,
    },
    libc::sock_filter {
        code: 0x06,
        jt: 0,
        jf: 0,
        k: 0xffff_ffff,
    },
    libc::sock_filter {
        code: 0x06,
        jt: 0,
        jf: 0,
        k: 0,
    },
];

fn setsockopt<T>(fd: RawFd, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const T as *const libc::c_void,
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn link_address(ifindex: u32, dest: &[u8]) -> libc::sockaddr_ll {
    let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as libc::c_ushort;
    addr.sll_protocol = MRP_ETHERTYPE.to_be();
    addr.sll_ifindex = ifindex as libc::c_int;
    addr.sll_halen = 6;
    addr.sll_addr[..6].copy_from_slice(&dest[..6]);
    addr
}

/// MRP frame socket for all ring ports
pub struct PacketSocket {
    fd: AsyncFd<Socket>,
}

impl PacketSocket {
    /// Open the socket. Needs `CAP_NET_RAW` and a tokio runtime.
    pub fn open() -> io::Result<Self> {
        let protocol = Protocol::from((libc::ETH_P_ALL as u16).to_be() as i32);
        let socket = Socket::new(Domain::PACKET, Type::RAW, Some(protocol))?;
        let fd = socket.as_raw_fd();

        let program = libc::sock_fprog {
            len: MRP_FILTER.len() as libc::c_ushort,
            filter: MRP_FILTER.as_ptr() as *mut libc::sock_filter,
        };
        setsockopt(fd, libc::SOL_SOCKET, libc::SO_ATTACH_FILTER, &program)?;
        setsockopt(fd, libc::SOL_PACKET, PACKET_IGNORE_OUTGOING, &(1 as libc::c_int))?;
        setsockopt(fd, libc::SOL_SOCKET, libc::SO_PRIORITY, &MRP_SOCKET_PRIORITY)?;
        socket.set_nonblocking(true)?;

        debug!("Packet socket open");
        Ok(Self {
            fd: AsyncFd::new(socket)?,
        })
    }

    /// Receive one frame. Returns its length and the receiving interface.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, u32)> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| recv_frame(inner.get_ref().as_raw_fd(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

fn recv_frame(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, u32)> {
    let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    let mut addr_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;

    let len = unsafe {
        libc::recvfrom(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
            &mut addr as *mut libc::sockaddr_ll as *mut libc::sockaddr,
            &mut addr_len,
        )
    };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }

    trace!(len, ifindex = addr.sll_ifindex, "Frame received");
    Ok((len as usize, addr.sll_ifindex as u32))
}

impl FrameSender for PacketSocket {
    /// The destination address is taken from the frame itself.
    fn send(&self, ifindex: u32, frame: &[u8]) -> io::Result<()> {
        if frame.len() < 14 {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "Frame shorter than an Ethernet header",
            ));
        }
        let addr = link_address(ifindex, &frame[..6]);

        let sent = unsafe {
            libc::sendto(
                self.fd.get_ref().as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };

        if sent < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::WouldBlock {
                debug!(ifindex, "Socket busy, frame dropped");
                return Ok(());
            }
            return Err(err);
        }
        if sent as usize != frame.len() {
            return Err(io::Error::new(
                ErrorKind::WriteZero,
                format!("Short write: {} instead of {}", sent, frame.len()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_mrp_ethertype() {
        // load half word at the EtherType offset
        assert_eq!(MRP_FILTER[0].code, 0x28);
        assert_eq!(MRP_FILTER[0].k, 12);
        assert_eq!(MRP_FILTER[1].k, 0x88e3);
        assert_eq!(MRP_FILTER[2].k, u32::MAX);
        assert_eq!(MRP_FILTER[3].k, 0);
    }

    #[test]
    fn test_link_address() {
        let dest = [0x01, 0x15, 0x4e, 0x00, 0x00, 0x01];
        let addr = link_address(7, &dest);

        assert_eq!(addr.sll_family, libc::AF_PACKET as u16);
        assert_eq!(u16::from_be(addr.sll_protocol), 0x88e3);
        assert_eq!(addr.sll_ifindex, 7);
        assert_eq!(&addr.sll_addr[..6], &dest);
    }

    #[tokio::test]
    async fn test_open_packet_socket() {
        // Requires CAP_NET_RAW
        if std::env::var("MRP_TEST_ENABLED").is_err() {
            eprintln!("Skipping test_open_packet_socket (requires MRP_TEST_ENABLED=1)");
            return;
        }

        let socket = PacketSocket::open().expect("packet socket");
        let short = socket.send(1, &[0u8; 4]);
        assert_eq!(short.unwrap_err().kind(), ErrorKind::InvalidInput);
    }
}
