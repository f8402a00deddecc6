//! Event sources backed by host callbacks.
//!
//! [`EventSources`] turns each host callback category into an [`Observable`]
//! or [`Completable`]. Every subscription performs its own `add_callback`,
//! and its terminal transition performs the matching `remove_callback`,
//! exactly once.

use std::sync::Arc;

use broker_host::{
    Callback, CallbackKind, CallbackRegistry, Connect, Disconnect, HostEvent, Priority, Publish,
};
use futures::StreamExt;

use crate::completable::Completable;
use crate::emitter::{CompletionEmitter, Emitter, EventReceiver};
use crate::error::{Result, RxError};
use crate::event::ClientEvent;
use crate::observable::{EventStream, Observable};
use crate::subscription::SubscriptionState;

/// Factories for streams over one host's callbacks.
#[derive(Clone)]
pub struct EventSources {
    registry: Arc<dyn CallbackRegistry>,
}

impl EventSources {
    pub fn new(registry: Arc<dyn CallbackRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<dyn CallbackRegistry> {
        &self.registry
    }

    /// Completes the first time the broker reports it has started.
    pub fn broker_start(&self, priority: Priority) -> Completable {
        self.completion(CallbackKind::BrokerStart, priority)
    }

    /// Completes the first time the broker reports it is stopping.
    pub fn broker_stop(&self, priority: Priority) -> Completable {
        self.completion(CallbackKind::BrokerStop, priority)
    }

    /// One event per client connection attempt.
    pub fn client_connects(&self, priority: Priority) -> Observable<ClientEvent<Connect>> {
        self.observe(CallbackKind::ClientConnect, priority, |event| match event {
            HostEvent::ClientConnect { connect, client } => {
                Some(ClientEvent::new(connect.clone(), client.clone()))
            }
            _ => None,
        })
    }

    /// One event per client disconnect.
    pub fn client_disconnects(&self, priority: Priority) -> Observable<ClientEvent<Disconnect>> {
        self.observe(CallbackKind::ClientDisconnect, priority, |event| match event {
            HostEvent::ClientDisconnect { disconnect, client } => {
                Some(ClientEvent::new(*disconnect, client.clone()))
            }
            _ => None,
        })
    }

    /// One event per inbound PUBLISH.
    pub fn publishes_received(&self, priority: Priority) -> Observable<ClientEvent<Publish>> {
        self.observe(CallbackKind::PublishReceived, priority, |event| match event {
            HostEvent::PublishReceived { publish, client } => {
                Some(ClientEvent::new(publish.clone(), client.clone()))
            }
            _ => None,
        })
    }

    /// The cron expression, each time the host's scheduler fires it.
    ///
    /// Scheduled callbacks carry no priority; the host's default is used.
    pub fn scheduled(&self, cron: impl Into<String>) -> Observable<String> {
        let cron = cron.into();
        self.observe(
            CallbackKind::Scheduled { cron },
            Priority::default(),
            |event| match event {
                HostEvent::Scheduled { cron } => Some(cron.clone()),
                _ => None,
            },
        )
    }

    /// Multi-emission source over any callback kind.
    ///
    /// `extract` runs on the host's dispatching thread for every invocation
    /// and returns the event to emit, or `None` to skip the invocation.
    pub fn observe<T, F>(&self, kind: CallbackKind, priority: Priority, extract: F) -> Observable<T>
    where
        T: Send + 'static,
        F: Fn(&HostEvent) -> Option<T> + Send + Sync + 'static,
    {
        let registry = Arc::clone(&self.registry);
        let extract = Arc::new(extract);

        Observable::from_producer(move |state| {
            let (emitter, receiver) = Emitter::channel(state);
            let extract = Arc::clone(&extract);
            let callback = Callback::new(kind.clone(), priority, move |event| {
                emitter.emit_with(|| extract(event));
                Ok(())
            });
            register(&registry, state, callback)?;
            Ok(receiver_stream(receiver))
        })
    }

    /// Completion-mode source over any callback kind.
    pub fn completion(&self, kind: CallbackKind, priority: Priority) -> Completable {
        let registry = Arc::clone(&self.registry);

        Completable::from_producer(move |state| {
            let (emitter, receiver) = CompletionEmitter::channel(state);
            let callback = Callback::new(kind.clone(), priority, move |_event| {
                emitter.complete();
                Ok(())
            });
            register(&registry, state, callback)?;
            Ok(receiver_stream(receiver))
        })
    }
}

/// Add `callback` to the host and schedule its removal for the subscription's
/// terminal transition.
fn register(
    registry: &Arc<dyn CallbackRegistry>,
    state: &Arc<SubscriptionState>,
    callback: Callback,
) -> Result<()> {
    let kind = callback.kind().clone();
    let handle = registry
        .add_callback(callback)
        .map_err(RxError::RegistrationRejected)?;

    tracing::debug!("Subscription {} registered {} callback {}", state.id(), kind, handle);

    let registry = Arc::clone(registry);
    let id = state.id();
    state.on_teardown(move || match registry.remove_callback(handle) {
        Ok(()) => {
            tracing::debug!("Subscription {} deregistered callback {}", id, handle);
        }
        Err(e) => {
            tracing::warn!(
                "Failed to deregister callback {} for subscription {}: {}",
                handle,
                id,
                e
            );
        }
    });

    Ok(())
}

fn receiver_stream<T: Send + 'static>(mut receiver: EventReceiver<T>) -> EventStream<T> {
    futures::stream::poll_fn(move |cx| receiver.poll_recv(cx)).boxed()
}
