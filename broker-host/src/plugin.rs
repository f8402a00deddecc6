//! Plugin lifecycle.
//!
//! The host instantiates plugins, hands each one a [`PluginContext`] with the
//! capabilities it may use, and later shuts them down. [`PluginRegistry`] runs
//! that lifecycle for a set of plugins; [`LocalHost`] assembles an in-process
//! host whose context can be handed to it.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::registry::{CallbackRegistry, LocalRegistry};
use crate::store::{
    MemoryRetainedStore, MemorySubscriptionStore, RetainedMessageStore, SubscriptionStore,
};

/// Errors that can occur during plugin lifecycle operations.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Plugin shutdown failed: {0}")]
    ShutdownFailed(String),
}

/// Capabilities a plugin receives from the host.
///
/// Each field is an explicitly passed capability; plugins never reach for
/// ambient host state.
#[derive(Clone)]
pub struct PluginContext {
    /// Registry for attaching callbacks
    pub registry: Arc<dyn CallbackRegistry>,
    /// Retained-message store
    pub retained_messages: Arc<dyn RetainedMessageStore>,
    /// Client subscription store
    pub subscriptions: Arc<dyn SubscriptionStore>,
}

impl PluginContext {
    pub fn new(
        registry: Arc<dyn CallbackRegistry>,
        retained_messages: Arc<dyn RetainedMessageStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
    ) -> Self {
        Self {
            registry,
            retained_messages,
            subscriptions,
        }
    }
}

/// Trait implemented by broker plugins.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Get the name of this plugin.
    fn name(&self) -> &'static str;

    /// Initialize the plugin with the given context.
    ///
    /// Called once during host startup; this is where plugins register their
    /// callbacks.
    async fn initialize(&mut self, context: &PluginContext) -> Result<(), PluginError>;

    /// Shutdown the plugin gracefully, releasing everything it registered.
    async fn shutdown(&mut self) -> Result<(), PluginError>;
}

/// Runs the lifecycle of a set of plugins.
pub struct PluginRegistry {
    /// Collection of registered plugins
    plugins: Vec<Box<dyn Plugin>>,
    /// Whether plugins have been initialized
    initialized: bool,
}

impl PluginRegistry {
    /// Create a new empty plugin registry.
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            initialized: false,
        }
    }

    /// Register a plugin. Plugins are initialized in registration order.
    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Initialize all registered plugins.
    ///
    /// A plugin that fails to initialize is logged and skipped; the remaining
    /// plugins are still initialized. Calling this twice is a no-op.
    pub async fn initialize_all(&mut self, context: &PluginContext) -> Result<(), PluginError> {
        if self.initialized {
            return Ok(());
        }

        for plugin in &mut self.plugins {
            match plugin.initialize(context).await {
                Ok(()) => {
                    tracing::info!("Plugin '{}' initialized", plugin.name());
                }
                Err(e) => {
                    tracing::error!("Plugin '{}' initialization failed: {}", plugin.name(), e);
                }
            }
        }

        self.initialized = true;
        Ok(())
    }

    /// Shutdown all registered plugins in reverse order of registration.
    ///
    /// Shutdown errors are logged and don't prevent the remaining plugins from
    /// shutting down.
    pub async fn shutdown_all(&mut self) -> Result<(), PluginError> {
        if !self.initialized {
            return Ok(());
        }

        for plugin in self.plugins.iter_mut().rev() {
            match plugin.shutdown().await {
                Ok(()) => {
                    tracing::info!("Plugin '{}' shut down", plugin.name());
                }
                Err(e) => {
                    tracing::error!("Plugin '{}' shutdown failed: {}", plugin.name(), e);
                }
            }
        }

        self.initialized = false;
        Ok(())
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process host: a [`LocalRegistry`] plus in-memory stores.
#[derive(Clone, Default)]
pub struct LocalHost {
    pub registry: Arc<LocalRegistry>,
    pub retained_messages: Arc<MemoryRetainedStore>,
    pub subscriptions: Arc<MemorySubscriptionStore>,
}

impl LocalHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// The capabilities handed to plugins running on this host.
    pub fn context(&self) -> PluginContext {
        PluginContext::new(
            self.registry.clone(),
            self.retained_messages.clone(),
            self.subscriptions.clone(),
        )
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    prop_compose! {
        fn arb_plugin_name()(name in "[a-zA-Z][a-zA-Z0-9_-]{0,20}") -> String {
            name
        }
    }

    struct NamedPlugin {
        name: &'static str,
    }

    #[async_trait]
    impl Plugin for NamedPlugin {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn initialize(&mut self, _context: &PluginContext) -> Result<(), PluginError> {
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<(), PluginError> {
            Ok(())
        }
    }

    proptest! {
        /// Every registered plugin stays visible in registration order.
        #[test]
        fn test_plugin_registration_persistence(plugin_names in prop::collection::vec(arb_plugin_name(), 1..10)) {
            tokio_test::block_on(async {
                let mut registry = PluginRegistry::new();

                for name in &plugin_names {
                    let name: &'static str = Box::leak(name.clone().into_boxed_str());
                    registry.register(Box::new(NamedPlugin { name }));
                }

                prop_assert_eq!(registry.plugin_count(), plugin_names.len());
                let registered = registry.plugin_names();
                for (registered, expected) in registered.iter().zip(&plugin_names) {
                    prop_assert_eq!(*registered, expected.as_str());
                }

                registry.initialize_all(&LocalHost::new().context()).await.unwrap();
                prop_assert!(registry.is_initialized());
                Ok(())
            })?;
        }
    }
}
