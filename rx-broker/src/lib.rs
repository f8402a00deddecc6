//! # rx-broker
//!
//! Cancellable, composable event streams over a broker's callback-registration
//! API.
//!
//! A broker host exposes "register a callback, get invoked until removed".
//! This crate wraps that contract as lazy streams:
//!
//! - [`EventSources`]: one factory per callback category. Multi-emission
//!   sources ([`Observable`]) emit once per host invocation until cancelled.
//!   Completion-mode sources ([`Completable`]) signal once and deregister.
//! - [`Observable::map`], [`Observable::try_map`] and
//!   [`Observable::flat_map_async`] compose downstream work without touching
//!   the registry.
//! - [`Single`] / [`bridge`] adapt deferred host operations (store calls
//!   answered later) into values `flat_map_async` can wait on.
//! - [`Subscription`] is the handle a terminal `subscribe` returns. Cancelling
//!   it deregisters the host callback exactly once.
//!
//! ## Threading
//!
//! Host callbacks may run on any host thread. They only push onto the
//! subscription's unbounded channel; delivery to the consumer happens on a
//! drive task on the tokio runtime captured at subscribe time, in host
//! invocation order. Across `flat_map_async`, results arrive in completion
//! order.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use broker_host::{LocalRegistry, Priority};
//! use rx_broker::prelude::*;
//!
//! # async fn example() -> rx_broker::Result<()> {
//! let registry = Arc::new(LocalRegistry::new());
//! let sources = EventSources::new(registry.clone());
//!
//! let subscription = sources
//!     .publishes_received(Priority::MEDIUM)
//!     .map(|event| (event.client_id().to_string(), event.message.topic))
//!     .subscribe(
//!         |(client, topic)| println!("{} published to {}", client, topic),
//!         |error| eprintln!("stream error: {}", error),
//!     )?;
//!
//! // Deregisters the callback from the host
//! subscription.cancel();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod completable;
mod emitter;
pub mod error;
pub mod event;
pub mod observable;
pub mod source;
pub mod stream;
pub mod subscription;

// Re-export main types for convenience
pub use bridge::{bridge, Canceller, Completer, Single};
pub use completable::Completable;
pub use error::{BoxError, Result, RxError};
pub use event::ClientEvent;
pub use observable::{FnObserver, Observable, Observer};
pub use source::EventSources;
pub use stream::SubscriptionStream;
pub use subscription::{Subscription, SubscriptionId, SubscriptionSet, SubscriptionStatus};

/// Commonly used types for building plugins on top of event sources.
pub mod prelude {
    pub use crate::bridge::{bridge, Single};
    pub use crate::completable::Completable;
    pub use crate::error::{Result, RxError};
    pub use crate::event::ClientEvent;
    pub use crate::observable::{Observable, Observer};
    pub use crate::source::EventSources;
    pub use crate::subscription::{Subscription, SubscriptionSet};
}
