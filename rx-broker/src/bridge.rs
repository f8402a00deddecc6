//! Bridging deferred host operations into the stream world.
//!
//! Host stores answer later: either through a future, or by invoking a
//! completion callback from one of the host's threads. [`Single`] wraps both
//! shapes as one awaitable value that settles exactly once, and that cancels
//! the underlying operation when dropped before settling.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use tokio::sync::oneshot;

use crate::error::{BoxError, Result, RxError};

/// Action that aborts an external operation that has not settled yet.
pub type Canceller = Box<dyn FnOnce() + Send + 'static>;

/// One deferred result: exactly one value or exactly one error.
///
/// Awaiting a `Single` yields `Result<T, RxError>`. Dropping it before the
/// operation settles runs the canceller supplied by the operation, if any. An
/// operation that already settled is never cancelled, even when its result
/// was not polled yet.
#[must_use = "a Single does nothing unless awaited or passed to flat_map_async"]
pub struct Single<T> {
    future: BoxFuture<'static, Result<T>>,
    canceller: Option<Canceller>,
    settled: Option<Arc<AtomicBool>>,
}

impl<T: Send + 'static> Single<T> {
    /// Wrap a future whose failure is an operation error.
    pub fn from_future<F, E>(future: F) -> Self
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            future: future
                .map(|result| result.map_err(|e| RxError::AsyncOperation(e.into())))
                .boxed(),
            canceller: None,
            settled: None,
        }
    }

    /// Wrap a callback-style operation.
    ///
    /// `start` receives a [`Completer`] to settle from any thread and may
    /// return a [`Canceller`] for aborting the operation. The operation starts
    /// immediately, not on first poll. A completer dropped without settling
    /// resolves the `Single` to [`RxError::Abandoned`].
    pub fn from_callback<S>(start: S) -> Self
    where
        S: FnOnce(Completer<T>) -> Option<Canceller>,
    {
        let (sender, receiver) = oneshot::channel();
        let settled = Arc::new(AtomicBool::new(false));
        let canceller = start(Completer {
            sender,
            settled: Arc::clone(&settled),
        });

        Self {
            future: receiver
                .map(|settled| match settled {
                    Ok(result) => result,
                    Err(_) => Err(RxError::Abandoned),
                })
                .boxed(),
            canceller,
            settled: Some(settled),
        }
    }

    /// An already-settled success.
    pub fn ok(value: T) -> Self {
        Self {
            future: futures::future::ready(Ok(value)).boxed(),
            canceller: None,
            settled: None,
        }
    }

    /// An already-settled failure.
    pub fn err<E: Into<BoxError>>(error: E) -> Self {
        Self {
            future: futures::future::ready(Err(RxError::AsyncOperation(error.into()))).boxed(),
            canceller: None,
            settled: None,
        }
    }

    /// A stream yielding the settled result once.
    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        futures::stream::once(self).boxed()
    }
}

impl<T> Future for Single<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match this.future.as_mut().poll(cx) {
            Poll::Ready(result) => {
                // Settled: nothing left to cancel
                this.canceller = None;
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Single<T> {
    fn is_settled(&self) -> bool {
        self.settled
            .as_ref()
            .map_or(false, |settled| settled.load(Ordering::Acquire))
    }
}

impl<T> Drop for Single<T> {
    fn drop(&mut self) {
        if self.is_settled() {
            return;
        }
        if let Some(cancel) = self.canceller.take() {
            tracing::trace!("Cancelling unsettled async operation");
            cancel();
        }
    }
}

impl<T> fmt::Debug for Single<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Single")
            .field("cancellable", &self.canceller.is_some())
            .finish_non_exhaustive()
    }
}

/// Adapt a deferred operation into a [`Single`].
///
/// Shorthand for [`Single::from_future`].
pub fn bridge<T, E, F>(operation: F) -> Single<T>
where
    T: Send + 'static,
    E: Into<BoxError>,
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
{
    Single::from_future(operation)
}

/// Settles a callback-style [`Single`].
pub struct Completer<T> {
    sender: oneshot::Sender<Result<T>>,
    settled: Arc<AtomicBool>,
}

impl<T> Completer<T> {
    pub fn succeed(self, value: T) {
        self.settle(Ok(value));
    }

    pub fn fail<E: Into<BoxError>>(self, error: E) {
        self.settle(Err(RxError::AsyncOperation(error.into())));
    }

    /// Whether the `Single` was dropped and nobody will see the result.
    pub fn is_cancelled(&self) -> bool {
        self.sender.is_closed()
    }

    fn settle(self, result: Result<T>) {
        self.settled.store(true, Ordering::Release);
        if self.sender.send(result).is_err() {
            tracing::trace!("Async operation settled after its consumer went away");
        }
    }
}
