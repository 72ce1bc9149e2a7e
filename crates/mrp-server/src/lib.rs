//! MRP ring redundancy daemon.
//!
//! # Components
//!
//! - **Server**: single threaded event loop over the packet socket, the link
//!   monitor, the control socket and the ring timers
//! - **Control**: datagram protocol used by `mrpctl` to add, delete and list
//!   rings
//! - **Packet**: raw `AF_PACKET` socket carrying MRP frames
//! - **Config**: YAML configuration with ring defaults

pub mod config;
pub mod control;
pub mod ctl;
pub mod netif;
pub mod packet;
pub mod server;

pub use config::{Config, ConfigError, LogFormat};
pub use control::{ClientError, ControlClient, ControlServer};
pub use server::MrpServer;
