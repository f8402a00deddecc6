//! Plugin configuration.
//!
//! Loaded from a JSON file; every field is optional and falls back to its
//! default, so `{}` is a valid configuration.

use std::path::Path;
use std::time::Duration;

use broker_host::{Priority, QoS, Topic};
use serde::{Deserialize, Serialize};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// What the cleanup schedule does with retained messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Never remove retained messages
    KeepAll,
    /// Remove retained messages older than `max_age_secs`
    ExpireAfter { max_age_secs: u64 },
    /// Remove every retained message on each run
    ClearAll,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::ExpireAfter { max_age_secs: 3600 }
    }
}

/// Topic subscription granted to every connecting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectSubscription {
    pub filter: String,
    /// QoS level, 0 to 2
    pub qos: u8,
}

impl Default for ConnectSubscription {
    fn default() -> Self {
        Self {
            filter: "/default".to_string(),
            qos: 1,
        }
    }
}

/// Configuration for the hello-world plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginConfig {
    /// Logged when the broker starts
    /// Default: "Hello from the property file"
    pub my_property: String,

    /// Priority for every callback the plugin registers
    /// Default: 100 (medium)
    pub priority: i32,

    /// Topic of the retained message seeded at startup
    /// Default: "/default"
    pub default_topic: String,

    /// Payload of the retained message seeded at startup
    /// Default: "Hello World."
    pub default_message: String,

    /// Subscription added for each connecting client; `null` disables it
    /// Default: "/default" at QoS 1
    pub connect_subscription: Option<ConnectSubscription>,

    /// Schedule of the heartbeat log line
    /// Default: every 30 seconds
    pub heartbeat_cron: String,

    /// Schedule of the retained-message sweep
    /// Default: hourly
    pub cleanup_cron: String,

    /// Default: expire after one hour
    pub retention: RetentionPolicy,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            my_property: "Hello from the property file".to_string(),
            priority: Priority::MEDIUM.value(),
            default_topic: "/default".to_string(),
            default_message: "Hello World.".to_string(),
            connect_subscription: Some(ConnectSubscription::default()),
            heartbeat_cron: "0/30 * * * * ?".to_string(),
            cleanup_cron: "0 0 * * * ?".to_string(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl PluginConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: PluginConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_topic.is_empty() {
            return Err(ConfigError::Invalid("default_topic must not be empty".to_string()));
        }

        if let Some(subscription) = &self.connect_subscription {
            if subscription.filter.is_empty() {
                return Err(ConfigError::Invalid(
                    "connect_subscription.filter must not be empty".to_string(),
                ));
            }
            if QoS::from_u8(subscription.qos).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "connect_subscription.qos must be 0, 1 or 2, got {}",
                    subscription.qos
                )));
            }
        }

        for (name, cron) in [
            ("heartbeat_cron", &self.heartbeat_cron),
            ("cleanup_cron", &self.cleanup_cron),
        ] {
            if cron.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", name)));
            }
        }

        if let RetentionPolicy::ExpireAfter { max_age_secs: 0 } = self.retention {
            return Err(ConfigError::Invalid(
                "retention.max_age_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn priority(&self) -> Priority {
        Priority(self.priority)
    }

    /// The topic granted to connecting clients, if enabled.
    pub fn connect_topic(&self) -> Option<Topic> {
        self.connect_subscription.as_ref().map(|subscription| {
            Topic::new(
                subscription.filter.clone(),
                QoS::from_u8(subscription.qos).unwrap_or_default(),
            )
        })
    }

    /// Maximum age of retained messages under [`RetentionPolicy::ExpireAfter`].
    pub fn max_retained_age(&self) -> Option<Duration> {
        match self.retention {
            RetentionPolicy::ExpireAfter { max_age_secs } => Some(Duration::from_secs(max_age_secs)),
            _ => None,
        }
    }
}
