//! Common utilities and types shared across the MRP daemon crates.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
