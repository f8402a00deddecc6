//! Host-side half of a subscription.
//!
//! An [`Emitter`] lives inside the callback registered with the host. It runs
//! on whatever thread the host dispatches from, so it does nothing but check
//! liveness and push onto the subscription's unbounded channel.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{panic_message, Result, RxError};
use crate::subscription::SubscriptionState;

pub(crate) type EventSender<T> = mpsc::UnboundedSender<Result<T>>;
pub(crate) type EventReceiver<T> = mpsc::UnboundedReceiver<Result<T>>;

pub(crate) struct Emitter<T> {
    sender: EventSender<T>,
    state: Arc<SubscriptionState>,
}

impl<T: Send + 'static> Emitter<T> {
    pub(crate) fn channel(state: &Arc<SubscriptionState>) -> (Self, EventReceiver<T>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let emitter = Self {
            sender,
            state: Arc::clone(state),
        };
        (emitter, receiver)
    }

    /// Build an event with `extract` and queue it.
    ///
    /// Nothing is queued once the subscription has ended, and `extract` is not
    /// even run. `None` means the invocation carried nothing for this source.
    /// A panic inside `extract` is queued as [`RxError::UpstreamCallback`].
    pub(crate) fn emit_with<F>(&self, extract: F)
    where
        F: FnOnce() -> Option<T>,
    {
        if !self.state.is_live() {
            tracing::trace!("Dropping late event for ended subscription {}", self.state.id());
            return;
        }

        match catch_unwind(AssertUnwindSafe(extract)) {
            Ok(Some(event)) => self.send(Ok(event)),
            Ok(None) => {}
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::debug!(
                    "Callback for subscription {} panicked: {}",
                    self.state.id(),
                    message
                );
                self.send(Err(RxError::UpstreamCallback(message)));
            }
        }
    }

    fn send(&self, item: Result<T>) {
        if self.sender.send(item).is_err() {
            tracing::trace!("Subscription {} no longer receiving", self.state.id());
        }
    }
}

/// Emitter for completion-mode sources: queues a single signal, once.
pub(crate) struct CompletionEmitter {
    inner: Emitter<()>,
    fired: AtomicBool,
}

impl CompletionEmitter {
    pub(crate) fn channel(state: &Arc<SubscriptionState>) -> (Self, EventReceiver<()>) {
        let (inner, receiver) = Emitter::channel(state);
        let emitter = Self {
            inner,
            fired: AtomicBool::new(false),
        };
        (emitter, receiver)
    }

    /// Queue the completion signal on the first call; later calls are ignored.
    pub(crate) fn complete(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            tracing::trace!(
                "Ignoring repeated completion for subscription {}",
                self.inner.state.id()
            );
            return;
        }
        self.inner.emit_with(|| Some(()));
    }
}
