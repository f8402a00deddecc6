//! Shared helpers for the rx-broker integration tests.
//!
//! - [`CountingRegistry`]: a [`LocalRegistry`] that records every add and
//!   remove so tests can assert exactly-once registration and teardown
//! - helpers for building host events and waiting for delivery
//! - [`init_tracing`]: route library logs to the test output

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use broker_host::{
    Callback, CallbackHandle, CallbackRegistry, ClientData, Connect, HostEvent, LocalRegistry,
    Publish,
};
use parking_lot::Mutex;

/// Registry wrapper that counts registrations and deregistrations.
#[derive(Default)]
pub struct CountingRegistry {
    inner: LocalRegistry,
    added: AtomicUsize,
    removed: AtomicUsize,
    handles: Mutex<Vec<CallbackHandle>>,
}

impl CountingRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn added(&self) -> usize {
        self.added.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    /// Every handle the registry ever issued, in issue order.
    pub fn handles(&self) -> Vec<CallbackHandle> {
        self.handles.lock().clone()
    }

    pub fn live(&self) -> usize {
        self.inner.len()
    }

    /// Play the host: deliver `event` to every matching callback.
    pub fn dispatch(&self, event: &HostEvent) {
        if let Err(e) = self.inner.dispatch(event) {
            panic!("dispatch refused by a callback: {}", e);
        }
    }
}

impl CallbackRegistry for CountingRegistry {
    fn add_callback(&self, callback: Callback) -> broker_host::Result<CallbackHandle> {
        let handle = self.inner.add_callback(callback)?;
        self.added.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().push(handle);
        Ok(handle)
    }

    fn remove_callback(&self, handle: CallbackHandle) -> broker_host::Result<()> {
        self.inner.remove_callback(handle)?;
        self.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn publish_event(topic: &str, payload: &'static [u8], client_id: &str) -> HostEvent {
    HostEvent::PublishReceived {
        publish: Publish::new(topic, payload),
        client: ClientData::new(client_id),
    }
}

pub fn connect_event(client_id: &str) -> HostEvent {
    HostEvent::ClientConnect {
        connect: Connect::new(client_id),
        client: ClientData::new(client_id),
    }
}

/// Install a test-writer subscriber once per test binary; later calls are
/// no-ops. Filter with `RUST_LOG`, e.g. `RUST_LOG=rx_broker=trace`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rx_broker=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Give drive tasks time to drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

/// Shared, lockable log for observer callbacks.
pub fn shared<T>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}
