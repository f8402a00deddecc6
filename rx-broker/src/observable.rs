//! Multi-emission streams and their operators.
//!
//! An [`Observable`] is a lazy recipe: nothing is registered with the host
//! until a terminal `subscribe*` call, and every such call builds an
//! independent pipeline with its own host registration. Operators wrap the
//! recipe, so `source.map(..).flat_map_async(..)` still registers exactly once
//! per subscription.

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use tokio::runtime::Handle;

use crate::bridge::Single;
use crate::error::{panic_message, BoxError, Result, RxError};
use crate::stream::SubscriptionStream;
use crate::subscription::{Subscription, SubscriptionState, SubscriptionStatus};

/// Items flowing through a pipeline: values, or errors local to one element.
pub(crate) type EventStream<T> = BoxStream<'static, Result<T>>;

type Producer<T> = dyn Fn(&Arc<SubscriptionState>) -> Result<EventStream<T>> + Send + Sync;

/// Terminal consumer of an [`Observable`].
///
/// Callbacks run on the subscription's drive task, one at a time and in
/// delivery order.
pub trait Observer<T>: Send + 'static {
    fn on_next(&mut self, value: T);

    /// An error local to one element; the stream continues afterwards.
    fn on_error(&mut self, error: RxError) {
        tracing::warn!("Unhandled stream error: {}", error);
    }

    /// The source ended on its own.
    fn on_complete(&mut self) {}
}

/// [`Observer`] assembled from closures.
pub struct FnObserver<N, E> {
    on_next: N,
    on_error: E,
}

impl<N, E> FnObserver<N, E> {
    pub fn new(on_next: N, on_error: E) -> Self {
        Self { on_next, on_error }
    }
}

impl<T, N, E> Observer<T> for FnObserver<N, E>
where
    N: FnMut(T) + Send + 'static,
    E: FnMut(RxError) + Send + 'static,
{
    fn on_next(&mut self, value: T) {
        (self.on_next)(value)
    }

    fn on_error(&mut self, error: RxError) {
        (self.on_error)(error)
    }
}

/// A lazy, cancellable sequence of events.
pub struct Observable<T> {
    producer: Arc<Producer<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Build an observable from a per-subscription stream factory.
    ///
    /// The factory runs once per subscription and may register teardown
    /// actions on the state it receives.
    pub(crate) fn from_producer<P>(producer: P) -> Self
    where
        P: Fn(&Arc<SubscriptionState>) -> Result<EventStream<T>> + Send + Sync + 'static,
    {
        Self {
            producer: Arc::new(producer),
        }
    }

    /// Transform each value.
    ///
    /// A panic inside `f` becomes an [`RxError::Transform`] for that element
    /// and the stream carries on.
    pub fn map<U, F>(self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let upstream = self.producer;

        Observable::from_producer(move |state| {
            let f = Arc::clone(&f);
            let stream = upstream(state)?;
            Ok(stream
                .map(move |item| {
                    item.and_then(|value| {
                        catch_unwind(AssertUnwindSafe(|| f(value))).map_err(|payload| {
                            RxError::Transform(panic_message(payload.as_ref()).into())
                        })
                    })
                })
                .boxed())
        })
    }

    /// Transform each value with a fallible function; an `Err` becomes an
    /// [`RxError::Transform`] for that element.
    pub fn try_map<U, E, F>(self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        E: Into<BoxError>,
        F: Fn(T) -> std::result::Result<U, E> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let upstream = self.producer;

        Observable::from_producer(move |state| {
            let f = Arc::clone(&f);
            let stream = upstream(state)?;
            Ok(stream
                .map(move |item| item.and_then(|value| f(value).map_err(|e| RxError::Transform(e.into()))))
                .boxed())
        })
    }

    /// Start one async operation per value and emit each result as it settles.
    ///
    /// Operations run concurrently, so results arrive in completion order
    /// rather than upstream order. A failed operation is emitted as an error
    /// element. Cancelling the subscription drops every unsettled operation.
    pub fn flat_map_async<U, F>(self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Single<U> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let upstream = self.producer;

        Observable::from_producer(move |state| {
            let f = Arc::clone(&f);
            let state = Arc::clone(state);
            let stream = upstream(&state)?;
            Ok(stream
                .map(move |item| match item {
                    Ok(value) => {
                        let pending = state.begin_operation();
                        let operation = catch_unwind(AssertUnwindSafe(|| f(value)));
                        async move {
                            let _pending = pending;
                            match operation {
                                Ok(single) => single.await,
                                Err(payload) => {
                                    Err(RxError::Transform(panic_message(payload.as_ref()).into()))
                                }
                            }
                        }
                        .boxed()
                    }
                    Err(error) => futures::future::ready(Err(error)).boxed(),
                })
                .buffer_unordered(usize::MAX)
                .boxed())
        })
    }

    /// Attach closures as the terminal consumer on the current tokio runtime.
    pub fn subscribe<N, E>(&self, on_next: N, on_error: E) -> Result<Subscription>
    where
        N: FnMut(T) + Send + 'static,
        E: FnMut(RxError) + Send + 'static,
    {
        self.subscribe_with(FnObserver::new(on_next, on_error))
    }

    /// Attach `observer` on the current tokio runtime.
    ///
    /// Registers with the host before returning; a host rejection is returned
    /// here and never reaches the observer.
    pub fn subscribe_with<O>(&self, observer: O) -> Result<Subscription>
    where
        O: Observer<T>,
    {
        let runtime = Handle::try_current().map_err(|_| RxError::NoRuntime)?;
        self.subscribe_on(&runtime, observer)
    }

    /// Attach `observer`, driving delivery on `runtime`.
    pub fn subscribe_on<O>(&self, runtime: &Handle, observer: O) -> Result<Subscription>
    where
        O: Observer<T>,
    {
        let state = SubscriptionState::new();
        let stream = match (self.producer)(&state) {
            Ok(stream) => stream,
            Err(e) => {
                state.terminate(SubscriptionStatus::Errored);
                return Err(e);
            }
        };

        spawn_drive(runtime, state, |state, guard| drive(state, guard, stream, observer))
    }

    /// Subscribe and consume the events as a pull-based stream.
    ///
    /// Dropping the returned stream cancels the subscription.
    pub fn into_stream(self) -> Result<SubscriptionStream<T>> {
        let (observer, stream) = SubscriptionStream::channel();
        let subscription = self.subscribe_with(observer)?;
        Ok(stream.attach(subscription))
    }
}

/// Cancels the subscription if its drive task is dropped before finishing,
/// including before its first poll. Happens when the runtime shuts down.
pub(crate) struct DriveGuard {
    state: Arc<SubscriptionState>,
    armed: bool,
}

impl DriveGuard {
    pub(crate) fn new(state: &Arc<SubscriptionState>) -> Self {
        Self {
            state: Arc::clone(state),
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DriveGuard {
    fn drop(&mut self) {
        if self.armed && self.state.terminate(SubscriptionStatus::Cancelled) {
            tracing::debug!("Drive task of subscription {} dropped", self.state.id());
        }
    }
}

/// Spawn a subscription's drive task on `runtime`.
///
/// The [`DriveGuard`] is built here and moved into the task, so a runtime
/// that drops the task unpolled still ends the subscription and deregisters
/// its host callback. A runtime that has already shut down drops the task at
/// spawn, which is reported as [`RxError::NoRuntime`].
pub(crate) fn spawn_drive<F, D>(
    runtime: &Handle,
    state: Arc<SubscriptionState>,
    drive: D,
) -> Result<Subscription>
where
    D: FnOnce(Arc<SubscriptionState>, DriveGuard) -> F,
    F: Future<Output = ()> + Send + 'static,
{
    let guard = DriveGuard::new(&state);
    let task = runtime.spawn(drive(Arc::clone(&state), guard));
    state.attach_task(task.abort_handle());

    if state.status() == SubscriptionStatus::Cancelled {
        tracing::debug!("Runtime refused drive task of subscription {}", state.id());
        return Err(RxError::NoRuntime);
    }
    Ok(Subscription::new(state))
}

/// Run one consumer callback. A panic ends the subscription as errored and
/// returns `false`.
pub(crate) fn deliver<F>(state: &SubscriptionState, callback: F) -> bool
where
    F: FnOnce(),
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(payload) => {
            if state.terminate(SubscriptionStatus::Errored) {
                tracing::error!(
                    "Consumer of subscription {} panicked: {}",
                    state.id(),
                    panic_message(payload.as_ref())
                );
            }
            false
        }
    }
}

async fn drive<T, O>(
    state: Arc<SubscriptionState>,
    mut guard: DriveGuard,
    mut stream: EventStream<T>,
    mut observer: O,
) where
    T: Send + 'static,
    O: Observer<T>,
{
    state.activate();

    while let Some(item) = stream.next().await {
        if !state.is_live() {
            tracing::trace!("Subscription {} ended, dropping event", state.id());
            guard.disarm();
            return;
        }
        let delivered = deliver(&state, || match item {
            Ok(value) => observer.on_next(value),
            Err(error) => observer.on_error(error),
        });
        if !delivered {
            guard.disarm();
            return;
        }
    }

    guard.disarm();
    if state.terminate(SubscriptionStatus::Completed) {
        deliver(&state, || observer.on_complete());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Observable fed by a test-controlled channel; the sender is handed out
    /// per subscription through `senders`.
    fn manual<T: Send + 'static>(
        senders: &Arc<Mutex<Vec<mpsc::UnboundedSender<Result<T>>>>>,
    ) -> Observable<T> {
        let senders = Arc::clone(senders);
        Observable::from_producer(move |_state| {
            let (sender, receiver) = mpsc::unbounded_channel();
            senders.lock().push(sender);
            Ok(tokio_stream_from(receiver))
        })
    }

    fn tokio_stream_from<T: Send + 'static>(
        mut receiver: mpsc::UnboundedReceiver<Result<T>>,
    ) -> EventStream<T> {
        futures::stream::poll_fn(move |cx| receiver.poll_recv(cx)).boxed()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_map_and_errors_reach_observer() {
        let senders = Arc::new(Mutex::new(Vec::new()));
        let values = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let (v, e) = (Arc::clone(&values), Arc::clone(&errors));
        let subscription = manual::<u32>(&senders)
            .map(|n| {
                assert!(n != 3, "three is not allowed");
                n * 10
            })
            .subscribe(move |n| v.lock().push(n), move |err| e.lock().push(err.to_string()))
            .unwrap();

        let sender = senders.lock()[0].clone();
        for n in 1..=4 {
            sender.send(Ok(n)).unwrap();
        }
        settle().await;

        assert_eq!(*values.lock(), vec![10, 20, 40]);
        assert_eq!(errors.lock().len(), 1);
        assert!(errors.lock()[0].contains("three is not allowed"));
        assert!(subscription.is_active());
    }

    #[tokio::test]
    async fn test_try_map_error_is_element_local() {
        let senders = Arc::new(Mutex::new(Vec::new()));
        let values = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(0usize));

        let (v, e) = (Arc::clone(&values), Arc::clone(&errors));
        let _subscription = manual::<&'static str>(&senders)
            .try_map(|s| s.parse::<u8>())
            .subscribe(move |n| v.lock().push(n), move |_| *e.lock() += 1)
            .unwrap();

        let sender = senders.lock()[0].clone();
        for s in ["1", "x", "2"] {
            sender.send(Ok(s)).unwrap();
        }
        settle().await;

        assert_eq!(*values.lock(), vec![1, 2]);
        assert_eq!(*errors.lock(), 1);
    }

    #[tokio::test]
    async fn test_each_subscribe_runs_the_producer() {
        let senders = Arc::new(Mutex::new(Vec::<mpsc::UnboundedSender<Result<u8>>>::new()));
        let source = manual(&senders);

        let a = source.subscribe(|_| {}, |_| {}).unwrap();
        let b = source.clone().map(|n| n + 1).subscribe(|_| {}, |_| {}).unwrap();

        assert_eq!(senders.lock().len(), 2);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_channel_close_completes() {
        struct Recording(Arc<Mutex<Vec<String>>>);

        impl Observer<u8> for Recording {
            fn on_next(&mut self, value: u8) {
                self.0.lock().push(format!("next:{}", value));
            }

            fn on_complete(&mut self) {
                self.0.lock().push("complete".to_string());
            }
        }

        let senders = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let subscription = manual::<u8>(&senders)
            .subscribe_with(Recording(Arc::clone(&log)))
            .unwrap();

        senders.lock()[0].send(Ok(1)).unwrap();
        senders.lock().clear();
        settle().await;

        assert_eq!(*log.lock(), vec!["next:1", "complete"]);
        assert_eq!(subscription.status(), SubscriptionStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_stops_delivery() {
        let senders = Arc::new(Mutex::new(Vec::new()));
        let values = Arc::new(Mutex::new(Vec::new()));

        let v = Arc::clone(&values);
        let subscription = manual::<u8>(&senders)
            .subscribe(move |n| v.lock().push(n), |_| {})
            .unwrap();
        let sender = senders.lock()[0].clone();

        sender.send(Ok(1)).unwrap();
        settle().await;
        subscription.cancel();
        let _ = sender.send(Ok(2));
        settle().await;

        assert_eq!(*values.lock(), vec![1]);
        assert!(subscription.is_cancelled());
    }

    #[tokio::test]
    async fn test_panicking_consumer_errors_only_its_subscription() {
        let senders = Arc::new(Mutex::new(Vec::new()));
        let source = manual::<u8>(&senders);

        let healthy_values = Arc::new(Mutex::new(Vec::new()));
        let v = Arc::clone(&healthy_values);
        let broken = source.subscribe(|_| panic!("consumer bug"), |_| {}).unwrap();
        let healthy = source.subscribe(move |n| v.lock().push(n), |_| {}).unwrap();

        for sender in senders.lock().iter() {
            sender.send(Ok(9)).unwrap();
        }
        settle().await;

        assert_eq!(broken.status(), SubscriptionStatus::Errored);
        assert!(healthy.is_active());
        assert_eq!(*healthy_values.lock(), vec![9]);
    }

    #[test]
    fn test_subscribe_outside_runtime() {
        let senders = Arc::new(Mutex::new(Vec::new()));
        let result = manual::<u8>(&senders).subscribe(|_| {}, |_| {});

        assert!(matches!(result, Err(RxError::NoRuntime)));
        assert!(senders.lock().is_empty());
    }

    #[test]
    fn test_subscribe_on_explicit_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let senders = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let subscription = manual::<u8>(&senders)
            .subscribe_on(
                runtime.handle(),
                FnObserver::new(
                    move |n| {
                        let _ = done_tx.send(n);
                    },
                    |_| {},
                ),
            )
            .unwrap();

        senders.lock()[0].send(Ok(5)).unwrap();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(1)).unwrap(), 5);
        subscription.cancel();
    }
}
