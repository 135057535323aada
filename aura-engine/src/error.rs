//! Error types for the tunnel engine

use thiserror::Error;

/// Result type alias for tunnel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during tunnel operations
#[derive(Debug, Error)]
pub enum Error {
    /// Bad caller input; no resources were touched
    #[error("invalid tunnel configuration: {0}")]
    InvalidConfig(String),

    /// The host has not granted the capability to establish the interface
    #[error("VPN permission has not been granted by the host")]
    PermissionRequired,

    /// The host refused or failed to establish the interface
    #[error("failed to establish the virtual interface: {0}")]
    InterfaceUnavailable(String),

    /// The tunnel engine rejected its parameters or failed internally
    #[error("tunnel engine failed to start: {0}")]
    EngineStartFailed(String),

    /// A tunnel is already running; duplicate start is a no-op
    #[error("tunnel is already running")]
    AlreadyRunning,

    /// The interface handle became unusable underneath the forwarding loop
    #[error("packet forwarding failed: {0}")]
    ForwardingFatal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interface layer error
    #[error("interface error: {0}")]
    Interface(#[from] aura_tun::Error),

    /// Control surface error
    #[error("control error: {0}")]
    Control(String),
}

impl Error {
    /// Machine-readable code for the control surface
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "INVALID_ARGS",
            Error::PermissionRequired => "VPN_PERMISSION_DENIED",
            _ => "VPN_ERROR",
        }
    }

    /// Whether a retry of `start` may succeed without caller-side changes
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::InterfaceUnavailable(_) | Error::EngineStartFailed(_) | Error::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_control_surface() {
        assert_eq!(Error::InvalidConfig("x".into()).code(), "INVALID_ARGS");
        assert_eq!(Error::PermissionRequired.code(), "VPN_PERMISSION_DENIED");
        assert_eq!(Error::AlreadyRunning.code(), "VPN_ERROR");
        assert_eq!(Error::EngineStartFailed("x".into()).code(), "VPN_ERROR");
    }

    #[test]
    fn operational_failures_are_retryable_input_failures_are_not() {
        assert!(Error::EngineStartFailed("x".into()).is_retryable());
        assert!(Error::InterfaceUnavailable("x".into()).is_retryable());
        assert!(!Error::InvalidConfig("x".into()).is_retryable());
        assert!(!Error::PermissionRequired.is_retryable());
    }
}
