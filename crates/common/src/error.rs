//! Common error types for the MRP daemon components.

use std::fmt;

/// A specialized Result type for MRP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for MRP operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Netlink error: {0}")]
    Netlink(String),

    #[error("Offload error: {0}")]
    Offload(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new netlink error.
    pub fn netlink(msg: impl fmt::Display) -> Self {
        Error::Netlink(msg.to_string())
    }

    /// Create a new offload error.
    pub fn offload(msg: impl fmt::Display) -> Self {
        Error::Offload(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_keep_message() {
        let err = Error::offload("set_port_state failed");
        assert_eq!(err.to_string(), "Offload error: set_port_state failed");

        let err = Error::netlink(format!("errno {}", -95));
        assert!(matches!(err, Error::Netlink(ref m) if m == "errno -95"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::WouldBlock, "busy");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
