//! The hello-world plugin.
//!
//! Reacts to broker lifecycle events, client traffic and two schedules, all
//! through rx-broker streams. Every subscription is kept in one
//! [`SubscriptionSet`] and cancelled on shutdown, which removes every callback
//! the plugin registered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker_host::{
    Plugin, PluginContext, PluginError, QoS, RetainedMessage, RetainedMessageStore,
};
use rx_broker::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{PluginConfig, RetentionPolicy};

/// Counters for everything the plugin reacted to.
#[derive(Debug, Default)]
pub struct PluginStats {
    broker_starts: AtomicU64,
    connects: AtomicU64,
    publishes: AtomicU64,
    disconnects: AtomicU64,
    heartbeats: AtomicU64,
    subscriptions_added: AtomicU64,
    retained_removed: AtomicU64,
}

/// Point-in-time copy of [`PluginStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub broker_starts: u64,
    pub connects: u64,
    pub publishes: u64,
    pub disconnects: u64,
    pub heartbeats: u64,
    pub subscriptions_added: u64,
    pub retained_removed: u64,
}

impl PluginStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            broker_starts: self.broker_starts.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            publishes: self.publishes.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            subscriptions_added: self.subscriptions_added.load(Ordering::Relaxed),
            retained_removed: self.retained_removed.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct HelloWorldPlugin {
    config: PluginConfig,
    subscriptions: SubscriptionSet,
    stats: Arc<PluginStats>,
}

impl HelloWorldPlugin {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            subscriptions: SubscriptionSet::new(),
            stats: Arc::new(PluginStats::default()),
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Shared handle to the plugin's counters.
    pub fn stats(&self) -> Arc<PluginStats> {
        Arc::clone(&self.stats)
    }

    /// Number of live subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.prune();
        self.subscriptions.len()
    }

    fn subscribe_all(&self, context: &PluginContext) -> rx_broker::Result<()> {
        let sources = EventSources::new(Arc::clone(&context.registry));
        let priority = self.config.priority();

        let my_property = self.config.my_property.clone();
        let stats = Arc::clone(&self.stats);
        self.subscriptions.insert(sources.broker_start(priority).subscribe(
            move || {
                bump(&stats.broker_starts);
                info!("Property from config file is: {}", my_property);
            },
            |e| warn!("Broker start signal failed: {}", e),
        )?);

        let stats = Arc::clone(&self.stats);
        self.subscriptions.insert(sources.client_connects(priority).subscribe(
            move |event| {
                bump(&stats.connects);
                info!("Client {} is connecting", event.client_id());
            },
            |e| warn!("Client connect stream error: {}", e),
        )?);

        if let Some(topic) = self.config.connect_topic() {
            let store = Arc::clone(&context.subscriptions);
            let stats = Arc::clone(&self.stats);
            self.subscriptions.insert(
                sources
                    .client_connects(priority)
                    .flat_map_async(move |event| {
                        let store = Arc::clone(&store);
                        let topic = topic.clone();
                        let client_id = event.client_id().to_string();
                        bridge(async move {
                            store
                                .add_subscription(&client_id, topic.clone())
                                .await
                                .map(|()| (client_id, topic))
                        })
                    })
                    .subscribe(
                        move |(client_id, topic)| {
                            bump(&stats.subscriptions_added);
                            info!("Subscribed client {} to {}", client_id, topic.filter);
                        },
                        |e| warn!("Failed to add subscription for connecting client: {}", e),
                    )?,
            );
        }

        let stats = Arc::clone(&self.stats);
        self.subscriptions.insert(sources.publishes_received(priority).subscribe(
            move |event| {
                bump(&stats.publishes);
                info!(
                    "Client {} published {} byte(s) to {}",
                    event.client_id(),
                    event.message.payload.len(),
                    event.message.topic
                );
            },
            |e| warn!("Publish stream error: {}", e),
        )?);

        let stats = Arc::clone(&self.stats);
        self.subscriptions.insert(sources.client_disconnects(priority).subscribe(
            move |event| {
                bump(&stats.disconnects);
                if event.message.abrupt {
                    info!("Client {} lost its connection", event.client_id());
                } else {
                    info!("Client {} disconnected", event.client_id());
                }
            },
            |e| warn!("Client disconnect stream error: {}", e),
        )?);

        let stats = Arc::clone(&self.stats);
        self.subscriptions.insert(sources.scheduled(self.config.heartbeat_cron.clone()).subscribe(
            move |cron| {
                bump(&stats.heartbeats);
                debug!("Heartbeat ({})", cron);
            },
            |e| warn!("Heartbeat schedule error: {}", e),
        )?);

        let store = Arc::clone(&context.retained_messages);
        let policy = self.config.retention;
        let stats = Arc::clone(&self.stats);
        self.subscriptions.insert(
            sources
                .scheduled(self.config.cleanup_cron.clone())
                .flat_map_async(move |_cron| {
                    let store = Arc::clone(&store);
                    bridge(async move { sweep_retained(store.as_ref(), policy).await })
                })
                .subscribe(
                    move |removed| {
                        stats.retained_removed.fetch_add(removed as u64, Ordering::Relaxed);
                        info!("Retained message sweep removed {} message(s)", removed);
                    },
                    |e| warn!("Retained message sweep failed: {}", e),
                )?,
        );

        Ok(())
    }
}

#[async_trait]
impl Plugin for HelloWorldPlugin {
    fn name(&self) -> &'static str {
        "hello-world"
    }

    async fn initialize(&mut self, context: &PluginContext) -> Result<(), PluginError> {
        if let Err(e) = self.subscribe_all(context) {
            self.subscriptions.cancel_all();
            return Err(PluginError::InitializationFailed(e.to_string()));
        }
        debug!("Registered {} subscription(s)", self.subscriptions.len());

        let added = add_retained_message(
            context.retained_messages.as_ref(),
            &self.config.default_topic,
            &self.config.default_message,
        )
        .await
        .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;
        if added {
            info!("Added retained message on {}", self.config.default_topic);
        }

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), PluginError> {
        let cancelled = self.subscriptions.cancel_all();
        info!("Cancelled {} subscription(s)", cancelled);
        Ok(())
    }
}

/// Retain `message` on `topic` unless the store already holds one there.
///
/// Returns whether a message was added.
pub async fn add_retained_message(
    store: &dyn RetainedMessageStore,
    topic: &str,
    message: &str,
) -> broker_host::Result<bool> {
    if store.contains(topic).await? {
        return Ok(false);
    }
    store
        .add_or_replace(RetainedMessage::new(
            topic.to_string(),
            message.to_string(),
            QoS::AtLeastOnce,
        ))
        .await?;
    Ok(true)
}

/// Apply `policy` to the retained-message store. Returns how many messages
/// were removed.
pub async fn sweep_retained(
    store: &dyn RetainedMessageStore,
    policy: RetentionPolicy,
) -> broker_host::Result<usize> {
    match policy {
        RetentionPolicy::KeepAll => Ok(0),
        RetentionPolicy::ClearAll => {
            let count = store.all().await?.len();
            store.clear().await?;
            Ok(count)
        }
        RetentionPolicy::ExpireAfter { max_age_secs } => {
            let max_age = Duration::from_secs(max_age_secs);
            let mut removed = 0;
            for message in store.all().await? {
                if message.age() > max_age {
                    store.remove(&message.topic).await?;
                    removed += 1;
                }
            }
            Ok(removed)
        }
    }
}
