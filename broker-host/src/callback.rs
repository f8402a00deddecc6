//! Callback descriptors understood by the host's registry.
//!
//! A [`Callback`] is a handler closure tagged with the [`CallbackKind`] it wants
//! to receive and a [`Priority`] the host uses to order competing callbacks of the
//! same kind. The host answers a registration with a [`CallbackHandle`] that names
//! the registration until it is removed again.

use std::fmt;
use std::sync::Arc;

use crate::message::{ClientData, Connect, Disconnect, Publish};

/// Ordering hint for callbacks registered for the same event kind.
///
/// Lower values are invoked first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    pub const HIGHEST: Priority = Priority(1);
    pub const HIGH: Priority = Priority(10);
    pub const MEDIUM: Priority = Priority(100);
    pub const LOW: Priority = Priority(1000);
    pub const LOWEST: Priority = Priority(10000);

    pub fn value(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::MEDIUM
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-side token for one callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackHandle(u64);

impl CallbackHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb-{}", self.0)
    }
}

/// The event category a callback is registered for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    BrokerStart,
    BrokerStop,
    ClientConnect,
    ClientDisconnect,
    PublishReceived,
    /// Fired by the host scheduler each time `cron` matches
    Scheduled { cron: String },
}

impl CallbackKind {
    /// Whether a callback of this kind should see `event`.
    pub fn matches(&self, event: &HostEvent) -> bool {
        match (self, event) {
            (CallbackKind::BrokerStart, HostEvent::BrokerStart)
            | (CallbackKind::BrokerStop, HostEvent::BrokerStop)
            | (CallbackKind::ClientConnect, HostEvent::ClientConnect { .. })
            | (CallbackKind::ClientDisconnect, HostEvent::ClientDisconnect { .. })
            | (CallbackKind::PublishReceived, HostEvent::PublishReceived { .. }) => true,
            (CallbackKind::Scheduled { cron }, HostEvent::Scheduled { cron: fired }) => {
                cron == fired
            }
            _ => false,
        }
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackKind::BrokerStart => write!(f, "broker-start"),
            CallbackKind::BrokerStop => write!(f, "broker-stop"),
            CallbackKind::ClientConnect => write!(f, "client-connect"),
            CallbackKind::ClientDisconnect => write!(f, "client-disconnect"),
            CallbackKind::PublishReceived => write!(f, "publish-received"),
            CallbackKind::Scheduled { cron } => write!(f, "scheduled({})", cron),
        }
    }
}

/// A single invocation delivered by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    BrokerStart,
    BrokerStop,
    ClientConnect {
        connect: Connect,
        client: ClientData,
    },
    ClientDisconnect {
        disconnect: Disconnect,
        client: ClientData,
    },
    PublishReceived {
        publish: Publish,
        client: ClientData,
    },
    Scheduled {
        cron: String,
    },
}

impl HostEvent {
    /// The callback kind this event is dispatched to.
    pub fn kind(&self) -> CallbackKind {
        match self {
            HostEvent::BrokerStart => CallbackKind::BrokerStart,
            HostEvent::BrokerStop => CallbackKind::BrokerStop,
            HostEvent::ClientConnect { .. } => CallbackKind::ClientConnect,
            HostEvent::ClientDisconnect { .. } => CallbackKind::ClientDisconnect,
            HostEvent::PublishReceived { .. } => CallbackKind::PublishReceived,
            HostEvent::Scheduled { cron } => CallbackKind::Scheduled { cron: cron.clone() },
        }
    }
}

/// Outcome a callback reports back into host dispatch.
///
/// The host decides what each variant means; e.g. a refused connection
/// disconnects the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    #[error("Connection refused: {0}")]
    RefusedConnection(String),

    #[error("Broker unable to start: {0}")]
    UnableToStart(String),

    #[error("Callback failed: {0}")]
    Failed(String),
}

type Handler = dyn Fn(&HostEvent) -> Result<(), CallbackError> + Send + Sync;

/// A handler registered with the host for one [`CallbackKind`].
#[derive(Clone)]
pub struct Callback {
    kind: CallbackKind,
    priority: Priority,
    handler: Arc<Handler>,
}

impl Callback {
    pub fn new<F>(kind: CallbackKind, priority: Priority, handler: F) -> Self
    where
        F: Fn(&HostEvent) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        Self {
            kind,
            priority,
            handler: Arc::new(handler),
        }
    }

    pub fn kind(&self) -> &CallbackKind {
        &self.kind
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Run the handler for `event`.
    pub fn invoke(&self, event: &HostEvent) -> Result<(), CallbackError> {
        (self.handler)(event)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
