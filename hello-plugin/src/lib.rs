//! Hello-world broker plugin built on rx-broker.
//!
//! On initialization the plugin subscribes to broker start, client connects,
//! publishes and disconnects, a heartbeat schedule and a retained-message
//! cleanup schedule. It also seeds a default retained message. Everything it
//! registers is released again on shutdown.
//!
//! ```rust,no_run
//! use broker_host::{LocalHost, PluginRegistry};
//! use hello_plugin::{HelloWorldPlugin, PluginConfig};
//!
//! # async fn example() -> Result<(), broker_host::PluginError> {
//! let host = LocalHost::new();
//! let mut plugins = PluginRegistry::new();
//! plugins.register(Box::new(HelloWorldPlugin::new(PluginConfig::default())));
//!
//! plugins.initialize_all(&host.context()).await?;
//! // ... broker runs ...
//! plugins.shutdown_all().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod plugin;
pub mod simulation;

pub use config::{ConfigError, ConnectSubscription, PluginConfig, RetentionPolicy};
pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};
pub use plugin::{add_retained_message, sweep_retained, HelloWorldPlugin, PluginStats, StatsSnapshot};
pub use simulation::{HostSimulator, SimulationConfig};
