//! Completion-mode streams.
//!
//! A [`Completable`] carries no values, only the fact that something happened:
//! the first time its host callback fires, the consumer's `on_complete` runs
//! and the callback is deregistered. Later invocations are ignored.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::{Result, RxError};
use crate::observable::{deliver, spawn_drive, DriveGuard, EventStream};
use crate::subscription::{Subscription, SubscriptionState, SubscriptionStatus};

type Producer = dyn Fn(&Arc<SubscriptionState>) -> Result<EventStream<()>> + Send + Sync;

/// A lazy, cancellable one-shot completion signal.
#[derive(Clone)]
pub struct Completable {
    producer: Arc<Producer>,
}

impl fmt::Debug for Completable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completable").finish_non_exhaustive()
    }
}

impl Completable {
    pub(crate) fn from_producer<P>(producer: P) -> Self
    where
        P: Fn(&Arc<SubscriptionState>) -> Result<EventStream<()>> + Send + Sync + 'static,
    {
        Self {
            producer: Arc::new(producer),
        }
    }

    /// Attach closures on the current tokio runtime.
    ///
    /// `on_complete` runs at most once. `on_error` runs at most once, for a
    /// failure of the upstream callback, and ends the subscription.
    pub fn subscribe<C, E>(&self, on_complete: C, on_error: E) -> Result<Subscription>
    where
        C: FnOnce() + Send + 'static,
        E: FnOnce(RxError) + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| RxError::NoRuntime)?;
        self.subscribe_on(&runtime, on_complete, on_error)
    }

    /// Attach closures, driving delivery on `runtime`.
    pub fn subscribe_on<C, E>(
        &self,
        runtime: &Handle,
        on_complete: C,
        on_error: E,
    ) -> Result<Subscription>
    where
        C: FnOnce() + Send + 'static,
        E: FnOnce(RxError) + Send + 'static,
    {
        let state = SubscriptionState::new();
        let stream = match (self.producer)(&state) {
            Ok(stream) => stream,
            Err(e) => {
                state.terminate(SubscriptionStatus::Errored);
                return Err(e);
            }
        };

        spawn_drive(runtime, state, |state, guard| {
            drive(state, guard, stream, on_complete, on_error)
        })
    }

    /// Subscribe and wait for the signal.
    ///
    /// Resolves to `Ok(())` on completion and to the upstream error otherwise.
    /// If the host drops the callback without firing it, resolves to
    /// [`RxError::SourceClosed`]. Dropping the future cancels the subscription.
    pub async fn wait(&self) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        let error_sender = Arc::new(parking_lot::Mutex::new(Some(sender)));
        let complete_sender = Arc::clone(&error_sender);

        let subscription = self.subscribe(
            move || {
                if let Some(sender) = complete_sender.lock().take() {
                    let _ = sender.send(Ok(()));
                }
            },
            move |error| {
                if let Some(sender) = error_sender.lock().take() {
                    let _ = sender.send(Err(error));
                }
            },
        )?;
        let _cancel_on_drop = CancelOnDrop(subscription);

        // Both senders dropped unused: the host dropped the callback
        receiver.await.unwrap_or(Err(RxError::SourceClosed))
    }
}

struct CancelOnDrop(Subscription);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn drive<C, E>(
    state: Arc<SubscriptionState>,
    mut guard: DriveGuard,
    mut stream: EventStream<()>,
    on_complete: C,
    on_error: E,
) where
    C: FnOnce() + Send + 'static,
    E: FnOnce(RxError) + Send + 'static,
{
    state.activate();
    let first = stream.next().await;
    guard.disarm();

    match first {
        Some(Ok(())) => {
            if state.terminate(SubscriptionStatus::Completed) {
                deliver(&state, on_complete);
            }
        }
        Some(Err(error)) => {
            if state.terminate(SubscriptionStatus::Errored) {
                deliver(&state, || on_error(error));
            }
        }
        None => {
            // The host dropped the callback without ever firing it
            state.terminate(SubscriptionStatus::Completed);
        }
    }
}
