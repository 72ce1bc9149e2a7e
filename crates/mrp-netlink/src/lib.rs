//! Kernel bridge access for the MRP daemon.
//!
//! Provides the rtnetlink [`Offload`](mrp::Offload) implementation and the
//! link state monitor that feeds port up/down events into the registry.

pub mod link;
pub mod messages;
pub mod netlink;
pub mod offload;

pub use link::{LinkEvent, LinkMonitor};
pub use offload::NetlinkOffload;
