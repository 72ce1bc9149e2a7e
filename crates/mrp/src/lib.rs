//! Media Redundancy Protocol (IEC 62439-2) ring management.
//!
//! This crate holds the protocol core of the MRP daemon:
//! - PDU encoding and decoding
//! - Per-ring timers
//! - The MRM/MRC/MRA state machine
//! - The instance registry and received frame dispatch
//!
//! Kernel access sits behind the [`offload::Offload`] and
//! [`transport::FrameSender`] traits, so the core runs unchanged against
//! netlink in the daemon and against the [`testing`] doubles in tests.

pub mod dispatcher;
pub mod offload;
pub mod pdu;
pub mod registry;
pub mod state_machine;
pub mod testing;
pub mod timer;
pub mod transport;
pub mod types;

pub use dispatcher::{Disposition, Dispatcher};
pub use offload::Offload;
pub use pdu::{MrpFrame, Tlv};
pub use registry::{AddError, Backends, Registry, RemoveError, RingConfig};
pub use state_machine::{RingInstance, RingIo};
pub use transport::{FrameSender, InterfaceInfo};
pub use types::*;
