//! Host contract for MQTT broker plugins.
//!
//! This crate describes the surface a broker exposes to its plugins: a
//! callback registry, the payload records handed to callbacks, the auxiliary
//! stores, and the plugin lifecycle. It also ships an in-process reference
//! host so plugins can be exercised without a running broker.
//!
//! # Overview
//!
//! - [`CallbackRegistry`]: add and remove [`Callback`]s. Each registration is
//!   named by an opaque [`CallbackHandle`].
//! - [`LocalRegistry`]: in-process registry. The caller plays the broker by
//!   dispatching [`HostEvent`]s from any thread.
//! - [`RetainedMessageStore`] / [`SubscriptionStore`]: deferred store
//!   operations, with DashMap-backed in-memory implementations.
//! - [`Plugin`] / [`PluginRegistry`]: initialize and shut down plugins with a
//!   [`PluginContext`] of explicitly passed capabilities.
//!
//! # Example
//!
//! ```
//! use broker_host::{Callback, CallbackKind, CallbackRegistry, HostEvent, LocalRegistry, Priority};
//!
//! let registry = LocalRegistry::new();
//! let handle = registry
//!     .add_callback(Callback::new(CallbackKind::BrokerStart, Priority::MEDIUM, |_| {
//!         println!("broker started");
//!         Ok(())
//!     }))
//!     .unwrap();
//!
//! registry.dispatch(&HostEvent::BrokerStart).unwrap();
//! registry.remove_callback(handle).unwrap();
//! ```

pub mod callback;
pub mod error;
pub mod message;
pub mod plugin;
pub mod registry;
pub mod store;

pub use callback::{Callback, CallbackError, CallbackHandle, CallbackKind, HostEvent, Priority};
pub use error::{HostError, Result};
pub use message::{ClientData, Connect, Disconnect, Publish, QoS, RetainedMessage, Topic};
pub use plugin::{LocalHost, Plugin, PluginContext, PluginError, PluginRegistry};
pub use registry::{CallbackRegistry, LocalRegistry};
pub use store::{
    MemoryRetainedStore, MemorySubscriptionStore, RetainedMessageStore, SubscriptionStore,
};
