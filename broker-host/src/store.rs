//! Auxiliary host stores.
//!
//! Every operation is deferred: it hands back a future that settles later with
//! either a success marker or a [`HostError`]. The in-memory implementations
//! settle immediately but honour the same contract.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::message::{QoS, RetainedMessage, Topic};

/// Retained messages keyed by topic.
#[async_trait]
pub trait RetainedMessageStore: Send + Sync {
    async fn contains(&self, topic: &str) -> Result<bool>;

    async fn get(&self, topic: &str) -> Result<Option<RetainedMessage>>;

    /// Store `message`, replacing any message already retained for its topic.
    async fn add_or_replace(&self, message: RetainedMessage) -> Result<()>;

    /// Remove the message for `topic`; removing a missing topic is not an error.
    async fn remove(&self, topic: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn all(&self) -> Result<Vec<RetainedMessage>>;
}

/// Topic subscriptions per client.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Add (or re-grant) `topic` for `client_id`.
    async fn add_subscription(&self, client_id: &str, topic: Topic) -> Result<()>;

    async fn remove_subscription(&self, client_id: &str, filter: &str) -> Result<()>;

    /// Subscriptions of `client_id`, ordered by filter.
    async fn subscriptions(&self, client_id: &str) -> Result<Vec<Topic>>;
}

/// In-memory [`RetainedMessageStore`].
#[derive(Debug, Default)]
pub struct MemoryRetainedStore {
    messages: DashMap<String, RetainedMessage>,
}

impl MemoryRetainedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl RetainedMessageStore for MemoryRetainedStore {
    async fn contains(&self, topic: &str) -> Result<bool> {
        Ok(self.messages.contains_key(topic))
    }

    async fn get(&self, topic: &str) -> Result<Option<RetainedMessage>> {
        Ok(self.messages.get(topic).map(|entry| entry.value().clone()))
    }

    async fn add_or_replace(&self, message: RetainedMessage) -> Result<()> {
        self.messages.insert(message.topic.clone(), message);
        Ok(())
    }

    async fn remove(&self, topic: &str) -> Result<()> {
        self.messages.remove(topic);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.messages.clear();
        Ok(())
    }

    async fn all(&self) -> Result<Vec<RetainedMessage>> {
        let mut messages: Vec<RetainedMessage> = self
            .messages
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        messages.sort_by(|a, b| a.topic.cmp(&b.topic));
        Ok(messages)
    }
}

/// In-memory [`SubscriptionStore`].
#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
    /// client id -> (topic filter -> granted QoS)
    clients: DashMap<String, HashMap<String, QoS>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clients holding at least one subscription.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn add_subscription(&self, client_id: &str, topic: Topic) -> Result<()> {
        self.clients
            .entry(client_id.to_string())
            .or_default()
            .insert(topic.filter, topic.qos);
        Ok(())
    }

    async fn remove_subscription(&self, client_id: &str, filter: &str) -> Result<()> {
        let now_empty = match self.clients.get_mut(client_id) {
            Some(mut topics) => {
                topics.remove(filter);
                topics.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.clients.remove_if(client_id, |_, topics| topics.is_empty());
        }
        Ok(())
    }

    async fn subscriptions(&self, client_id: &str) -> Result<Vec<Topic>> {
        let mut topics: Vec<Topic> = self
            .clients
            .get(client_id)
            .map(|entry| {
                entry
                    .iter()
                    .map(|(filter, qos)| Topic::new(filter.clone(), *qos))
                    .collect()
            })
            .unwrap_or_default();
        topics.sort_by(|a, b| a.filter.cmp(&b.filter));
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retained_add_contains_get() {
        let store = MemoryRetainedStore::new();
        assert!(!store.contains("/default").await.unwrap());

        store
            .add_or_replace(RetainedMessage::new("/default", "Hello World.", QoS::AtLeastOnce))
            .await
            .unwrap();

        assert!(store.contains("/default").await.unwrap());
        let message = store.get("/default").await.unwrap().unwrap();
        assert_eq!(&message.payload[..], b"Hello World.");
        assert_eq!(message.qos, QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn test_retained_replace_keeps_one_per_topic() {
        let store = MemoryRetainedStore::new();
        store
            .add_or_replace(RetainedMessage::new("a", "1", QoS::AtMostOnce))
            .await
            .unwrap();
        store
            .add_or_replace(RetainedMessage::new("a", "2", QoS::AtMostOnce))
            .await
            .unwrap();
        store
            .add_or_replace(RetainedMessage::new("b", "3", QoS::AtMostOnce))
            .await
            .unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].topic, "a");
        assert_eq!(&all[0].payload[..], b"2");
    }

    #[tokio::test]
    async fn test_retained_remove_and_clear() {
        let store = MemoryRetainedStore::new();
        for topic in ["a", "b", "c"] {
            store
                .add_or_replace(RetainedMessage::new(topic, "x", QoS::AtMostOnce))
                .await
                .unwrap();
        }

        store.remove("b").await.unwrap();
        store.remove("missing").await.unwrap();
        assert_eq!(store.len(), 2);

        store.clear().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_subscription_store() {
        let store = MemorySubscriptionStore::new();

        store
            .add_subscription("dev-A", Topic::new("sensors/#", QoS::AtLeastOnce))
            .await
            .unwrap();
        store
            .add_subscription("dev-A", Topic::new("/default", QoS::AtMostOnce))
            .await
            .unwrap();
        store
            .add_subscription("dev-A", Topic::new("/default", QoS::ExactlyOnce))
            .await
            .unwrap();

        let topics = store.subscriptions("dev-A").await.unwrap();
        assert_eq!(
            topics,
            vec![
                Topic::new("/default", QoS::ExactlyOnce),
                Topic::new("sensors/#", QoS::AtLeastOnce),
            ]
        );
        assert!(store.subscriptions("dev-B").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscription_store_removal_drops_empty_clients() {
        let store = MemorySubscriptionStore::new();
        store
            .add_subscription("dev-A", Topic::new("/default", QoS::AtMostOnce))
            .await
            .unwrap();
        assert_eq!(store.client_count(), 1);

        store.remove_subscription("dev-A", "/default").await.unwrap();
        store.remove_subscription("dev-Z", "/default").await.unwrap();

        assert_eq!(store.client_count(), 0);
    }
}
