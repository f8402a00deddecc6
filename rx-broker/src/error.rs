//! Error types for the rx-broker crate.

use broker_host::HostError;

/// Boxed error carried by transform and async-operation failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by event sources, operators and subscriptions.
#[derive(Debug, thiserror::Error)]
pub enum RxError {
    /// The host refused the callback registration; returned from `subscribe`
    #[error("Callback registration rejected by host: {0}")]
    RegistrationRejected(#[source] HostError),

    /// The adapter's callback failed while turning a host invocation into an event
    #[error("Upstream callback failed: {0}")]
    UpstreamCallback(String),

    /// A `map`/`try_map` step failed for one element
    #[error("Transform failed: {0}")]
    Transform(#[source] BoxError),

    /// A bridged asynchronous operation settled with a failure
    #[error("Async operation failed: {0}")]
    AsyncOperation(#[source] BoxError),

    /// A callback-style operation dropped its completer without settling
    #[error("Async operation abandoned before settling")]
    Abandoned,

    /// A completion source ended without ever signalling, e.g. the host
    /// dropped its callback at shutdown
    #[error("Event source closed before signalling")]
    SourceClosed,

    /// `subscribe` was called outside a tokio runtime, or on one that has
    /// shut down
    #[error("No tokio runtime available to drive the subscription")]
    NoRuntime,
}

impl RxError {
    /// Whether the error ends the subscription rather than a single element.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RxError::RegistrationRejected(_) | RxError::SourceClosed | RxError::NoRuntime
        )
    }
}

/// Convenience type alias for Results using RxError.
pub type Result<T, E = RxError> = std::result::Result<T, E>;

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
