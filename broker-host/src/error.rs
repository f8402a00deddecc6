//! Error types for the host contract.

use crate::callback::CallbackHandle;

/// Errors reported by the host's registry and auxiliary stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The host refused to accept a callback registration
    #[error("Registration rejected: {0}")]
    Rejected(String),

    /// The handle does not name a live registration
    #[error("Unknown callback handle: {0}")]
    UnknownHandle(CallbackHandle),

    /// A scheduled callback carried an unusable cron expression
    #[error("Invalid cron expression: {0:?}")]
    InvalidSchedule(String),

    /// An auxiliary store operation failed
    #[error("Store operation failed: {0}")]
    Store(String),

    /// The host has shut down and accepts no further work
    #[error("Host is shut down")]
    ShutDown,
}

/// Convenience type alias for Results using HostError.
pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_error_display() {
        let error = HostError::Rejected("too many callbacks".to_string());
        assert_eq!(error.to_string(), "Registration rejected: too many callbacks");

        let error = HostError::UnknownHandle(CallbackHandle::new(7));
        assert_eq!(error.to_string(), "Unknown callback handle: cb-7");

        let error = HostError::InvalidSchedule("".to_string());
        assert_eq!(error.to_string(), "Invalid cron expression: \"\"");

        let error = HostError::Store("disk full".to_string());
        assert_eq!(error.to_string(), "Store operation failed: disk full");

        assert_eq!(HostError::ShutDown.to_string(), "Host is shut down");
    }
}
