//! Error types for aura-tun

use std::io;
use thiserror::Error;

/// Result type alias for interface operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing the virtual interface
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Device creation error
    #[error("device creation error: {0}")]
    DeviceCreation(String),

    /// Permission denied
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid network prefix
    #[error("invalid network prefix: {0}")]
    InvalidPrefix(String),

    /// Route management error
    #[error("route error: {0}")]
    Route(String),

    /// Interface not found
    #[error("interface not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Check if the error is a permission-related error
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::PermissionDenied(_) => true,
            Error::Io(e) => e.kind() == io::ErrorKind::PermissionDenied,
            Error::DeviceCreation(msg) => {
                msg.contains("permission denied") || msg.contains("not permitted")
            }
            _ => false,
        }
    }
}
