//! Host interface lookup.

use mrp::InterfaceInfo;
use mrp::types::MacAddr;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use std::ffi::{CStr, CString};
use std::io::{self, ErrorKind};
use tracing::debug;

/// Resolve an interface name to its index.
pub fn name_to_index(name: &str) -> io::Result<u32> {
    let c_name = CString::new(name).map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };

    if index == 0 {
        Err(io::Error::new(
            ErrorKind::NotFound,
            format!("Interface {} not found", name),
        ))
    } else {
        Ok(index)
    }
}

/// Resolve an interface index to its name.
pub fn index_to_name(ifindex: u32) -> io::Result<String> {
    let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];
    let name = unsafe { libc::if_indextoname(ifindex, buf.as_mut_ptr()) };
    if name.is_null() {
        return Err(io::Error::new(
            ErrorKind::NotFound,
            format!("Interface index {} not found", ifindex),
        ));
    }

    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}

/// [`InterfaceInfo`] backed by `getifaddrs(3)`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

impl SystemInterfaces {
    fn flags(name: &str) -> Option<InterfaceFlags> {
        let addrs = getifaddrs().ok()?;
        addrs
            .filter(|ifa| ifa.interface_name == name)
            .map(|ifa| ifa.flags)
            .next()
    }
}

impl InterfaceInfo for SystemInterfaces {
    fn mac_address(&self, ifindex: u32) -> Option<MacAddr> {
        let name = index_to_name(ifindex).ok()?;
        let addrs = match getifaddrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!(error = %e, "getifaddrs failed");
                return None;
            }
        };

        addrs
            .filter(|ifa| ifa.interface_name == name)
            .find_map(|ifa| ifa.address?.as_link_addr()?.addr())
            .map(MacAddr)
    }

    fn is_up(&self, ifindex: u32) -> bool {
        let Ok(name) = index_to_name(ifindex) else {
            return false;
        };
        Self::flags(&name).is_some_and(|flags| {
            flags.contains(InterfaceFlags::IFF_UP) && flags.contains(InterfaceFlags::IFF_RUNNING)
        })
    }
}
