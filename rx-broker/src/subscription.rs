//! Subscription bookkeeping.
//!
//! Every terminal `subscribe` call creates one [`SubscriptionState`]. The state
//! is shared by the host-side callback, the drive task and the caller's
//! [`Subscription`] handle. It moves through
//! `Created -> Active -> {Completed | Cancelled | Errored}`, and the teardown
//! actions (deregistering the host callback, stopping the drive task) run
//! exactly once, on the transition into a terminal status.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::AbortHandle;

/// Global counter for generating unique subscription IDs
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SubscriptionStatus {
    /// Registered with the host, drive task not yet running
    Created = 0,
    /// Drive task running, events are delivered
    Active = 1,
    /// The source ended on its own
    Completed = 2,
    /// Cancelled by the consumer
    Cancelled = 3,
    /// Ended by a terminal error or a panicking consumer
    Errored = 4,
}

impl SubscriptionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SubscriptionStatus::Created,
            1 => SubscriptionStatus::Active,
            2 => SubscriptionStatus::Completed,
            3 => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::Errored,
        }
    }

    /// Terminal statuses are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Completed | SubscriptionStatus::Cancelled | SubscriptionStatus::Errored
        )
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionStatus::Created => "created",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Completed => "completed",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Errored => "errored",
        };
        f.write_str(name)
    }
}

type Teardown = Box<dyn FnOnce() + Send>;

/// Shared state of one subscription.
pub(crate) struct SubscriptionState {
    id: SubscriptionId,

    /// `SubscriptionStatus` as u8
    status: AtomicU8,

    /// Actions run once on the terminal transition, last added first
    teardowns: Mutex<Vec<Teardown>>,

    /// Drive task, aborted on the terminal transition
    task: Mutex<Option<AbortHandle>>,

    /// In-flight async operations
    pending: AtomicUsize,
}

impl SubscriptionState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: SubscriptionId::next(),
            status: AtomicU8::new(SubscriptionStatus::Created as u8),
            teardowns: Mutex::new(Vec::new()),
            task: Mutex::new(None),
            pending: AtomicUsize::new(0),
        })
    }

    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Whether events may still be delivered.
    pub(crate) fn is_live(&self) -> bool {
        !self.status().is_terminal()
    }

    /// `Created -> Active`; a no-op in any other status.
    pub(crate) fn activate(&self) {
        let _ = self.status.compare_exchange(
            SubscriptionStatus::Created as u8,
            SubscriptionStatus::Active as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Register an action for the terminal transition. Runs it right away if
    /// the subscription already ended.
    pub(crate) fn on_teardown<F>(&self, teardown: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut teardowns = self.teardowns.lock();
            if self.is_live() {
                teardowns.push(Box::new(teardown));
                return;
            }
        }
        teardown();
    }

    pub(crate) fn attach_task(&self, task: AbortHandle) {
        let mut slot = self.task.lock();
        if self.is_live() {
            *slot = Some(task);
        } else {
            task.abort();
        }
    }

    /// Move into the terminal status `to`.
    ///
    /// Returns `true` for the single caller that performed the transition;
    /// every later call is a no-op returning `false`.
    pub(crate) fn terminate(&self, to: SubscriptionStatus) -> bool {
        debug_assert!(to.is_terminal());

        let mut current = self.status.load(Ordering::SeqCst);
        loop {
            if SubscriptionStatus::from_u8(current).is_terminal() {
                return false;
            }
            match self
                .status
                .compare_exchange(current, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        tracing::debug!("Subscription {} {}", self.id, to);

        let teardowns = std::mem::take(&mut *self.teardowns.lock());
        for teardown in teardowns.into_iter().rev() {
            teardown();
        }

        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        true
    }

    pub(crate) fn pending_operations(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_operation(self: &Arc<Self>) -> PendingOperation {
        self.pending.fetch_add(1, Ordering::SeqCst);
        PendingOperation {
            state: Arc::clone(self),
        }
    }
}

/// Counts one in-flight async operation until dropped.
pub(crate) struct PendingOperation {
    state: Arc<SubscriptionState>,
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        self.state.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to an attached consumer.
///
/// Cloning shares the same subscription. Dropping a handle does not cancel;
/// call [`Subscription::cancel`] to deregister from the host.
#[derive(Clone)]
pub struct Subscription {
    state: Arc<SubscriptionState>,
}

impl Subscription {
    pub(crate) fn new(state: Arc<SubscriptionState>) -> Self {
        Self { state }
    }

    pub fn id(&self) -> SubscriptionId {
        self.state.id()
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.state.status()
    }

    /// `true` until the subscription reaches a terminal status.
    pub fn is_active(&self) -> bool {
        self.state.is_live()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == SubscriptionStatus::Cancelled
    }

    /// Async operations started by `flat_map_async` that have not settled.
    pub fn pending_operations(&self) -> usize {
        self.state.pending_operations()
    }

    /// Stop delivery and deregister the host callback.
    ///
    /// Safe to call from any thread and any number of times; only the first
    /// call on a live subscription has an effect. Does not wait for delivery:
    /// an element already being delivered may finish, but no new element
    /// starts once this returns. In-flight async operations are dropped.
    pub fn cancel(&self) {
        if !self.state.terminate(SubscriptionStatus::Cancelled) {
            tracing::trace!("Subscription {} already ended", self.state.id());
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("pending_operations", &self.pending_operations())
            .finish()
    }
}

/// Concurrent collection of subscriptions owned by one consumer.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    subscriptions: DashMap<SubscriptionId, Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, subscription: Subscription) {
        self.subscriptions.insert(subscription.id(), subscription);
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Drop subscriptions that already ended. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|_, subscription| subscription.is_active());
        before.saturating_sub(self.subscriptions.len())
    }

    /// Cancel and remove every subscription. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<SubscriptionId> = self.subscriptions.iter().map(|entry| *entry.key()).collect();

        let mut cancelled = 0;
        for id in ids {
            if let Some((_, subscription)) = self.subscriptions.remove(&id) {
                if subscription.is_active() {
                    cancelled += 1;
                }
                subscription.cancel();
            }
        }
        cancelled
    }
}
