//! Callback registration and dispatch.
//!
//! [`CallbackRegistry`] is the contract every host exposes to plugins. The
//! [`LocalRegistry`] implementation keeps registrations in process and lets the
//! caller play the part of the broker by dispatching [`HostEvent`]s from any
//! thread.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::callback::{Callback, CallbackError, CallbackHandle, CallbackKind, HostEvent};
use crate::error::{HostError, Result};

/// Registry through which plugins attach callbacks to the host.
///
/// Every successful `add_callback` creates an independent entry; removing one
/// entry never affects another, even for identical callbacks.
pub trait CallbackRegistry: Send + Sync {
    /// Register `callback`, returning the handle that names the registration.
    fn add_callback(&self, callback: Callback) -> Result<CallbackHandle>;

    /// Remove a registration. Unknown handles are reported as
    /// [`HostError::UnknownHandle`].
    fn remove_callback(&self, handle: CallbackHandle) -> Result<()>;
}

impl<R: CallbackRegistry + ?Sized> CallbackRegistry for Arc<R> {
    fn add_callback(&self, callback: Callback) -> Result<CallbackHandle> {
        (**self).add_callback(callback)
    }

    fn remove_callback(&self, handle: CallbackHandle) -> Result<()> {
        (**self).remove_callback(handle)
    }
}

/// In-process host registry.
///
/// Dispatch takes a snapshot of the matching callbacks and releases the lock
/// before invoking them, so a callback may add or remove registrations
/// (including its own) while it runs.
pub struct LocalRegistry {
    /// Live registrations keyed by handle; handle order is registration order
    callbacks: RwLock<BTreeMap<CallbackHandle, Callback>>,

    /// Source of fresh handles
    next_id: AtomicU64,

    shut_down: AtomicBool,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Deliver `event` to every matching callback, highest priority first.
    ///
    /// Callbacks with equal priority run in registration order. The first
    /// callback that returns an error stops the chain and its error is
    /// returned, which is how e.g. a refused connection reaches the broker.
    pub fn dispatch(&self, event: &HostEvent) -> std::result::Result<(), CallbackError> {
        let targets = self.snapshot(event);

        tracing::trace!(
            "Dispatching {} to {} callback(s)",
            event.kind(),
            targets.len()
        );

        for (handle, callback) in targets {
            if let Err(e) = callback.invoke(event) {
                tracing::debug!("Callback {} stopped {} dispatch: {}", handle, event.kind(), e);
                return Err(e);
            }
        }

        Ok(())
    }

    /// Fire every callback scheduled with `cron`.
    pub fn fire_schedule(&self, cron: &str) -> std::result::Result<(), CallbackError> {
        self.dispatch(&HostEvent::Scheduled {
            cron: cron.to_string(),
        })
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    /// Number of live registrations of `kind`.
    pub fn count(&self, kind: &CallbackKind) -> usize {
        self.callbacks
            .read()
            .values()
            .filter(|callback| callback.kind() == kind)
            .count()
    }

    /// Whether `handle` still names a live registration.
    pub fn contains(&self, handle: CallbackHandle) -> bool {
        self.callbacks.read().contains_key(&handle)
    }

    /// Distinct cron expressions with at least one live registration.
    pub fn schedules(&self) -> Vec<String> {
        let mut crons: Vec<String> = self
            .callbacks
            .read()
            .values()
            .filter_map(|callback| match callback.kind() {
                CallbackKind::Scheduled { cron } => Some(cron.clone()),
                _ => None,
            })
            .collect();
        crons.sort();
        crons.dedup();
        crons
    }

    /// Drop every registration and refuse new ones.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let dropped = std::mem::take(&mut *self.callbacks.write());
        tracing::debug!("Local registry shut down, dropped {} callback(s)", dropped.len());
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn snapshot(&self, event: &HostEvent) -> Vec<(CallbackHandle, Callback)> {
        let mut targets: Vec<(CallbackHandle, Callback)> = self
            .callbacks
            .read()
            .iter()
            .filter(|(_, callback)| callback.kind().matches(event))
            .map(|(handle, callback)| (*handle, callback.clone()))
            .collect();

        // Stable sort keeps registration order for equal priorities
        targets.sort_by_key(|(_, callback)| callback.priority());
        targets
    }
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry for LocalRegistry {
    fn add_callback(&self, callback: Callback) -> Result<CallbackHandle> {
        if self.is_shut_down() {
            return Err(HostError::ShutDown);
        }

        if let CallbackKind::Scheduled { cron } = callback.kind() {
            validate_cron(cron)?;
        }

        let handle = CallbackHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            "Registered {} callback {} with priority {}",
            callback.kind(),
            handle,
            callback.priority()
        );
        self.callbacks.write().insert(handle, callback);

        Ok(handle)
    }

    fn remove_callback(&self, handle: CallbackHandle) -> Result<()> {
        let removed = self.callbacks.write().remove(&handle);
        match removed {
            Some(callback) => {
                tracing::debug!("Removed {} callback {}", callback.kind(), handle);
                Ok(())
            }
            None => Err(HostError::UnknownHandle(handle)),
        }
    }
}

/// Accept Quartz-style expressions: five to seven whitespace separated fields.
fn validate_cron(cron: &str) -> Result<()> {
    let fields = cron.split_whitespace().count();
    if (5..=7).contains(&fields) {
        Ok(())
    } else {
        Err(HostError::InvalidSchedule(cron.to_string()))
    }
}
