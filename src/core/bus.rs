//! Asynchronous message bus used to hand tasks to remote workers.
//!
//! The bus is a seam: the coordinator only needs publish/subscribe on string
//! topics carrying JSON payloads. The in-process broker backs unit tests and
//! single-node deployments; a networked broker can be swapped in behind the
//! same trait without touching the dispatch logic.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{Mutex, broadcast};

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()>;
    async fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value>;
    /// Live subscriptions on a topic. Diagnostic only.
    async fn subscriber_count(&self, topic: &str) -> usize;
}

pub struct InProcessBus {
    topics: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        let mut topics = self.topics.lock().await;
        let stale = match topics.get(topic) {
            Some(sender) => sender.send(payload).is_err(),
            None => false,
        };
        if stale {
            // Nobody listening anymore; drop the topic entry.
            topics.remove(topic);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    async fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().await;
        topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn published_messages_reach_subscribers() {
        let bus = InProcessBus::new();
        let mut rx = bus.subscribe("alpha").await;
        bus.publish("alpha", json!({"n": 1})).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), json!({"n": 1}));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = InProcessBus::new();
        bus.publish("nowhere", json!("dropped")).await.unwrap();
        assert_eq!(bus.subscriber_count("nowhere").await, 0);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = InProcessBus::new();
        let mut a = bus.subscribe("a").await;
        let mut b = bus.subscribe("b").await;
        bus.publish("a", json!("for-a")).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), json!("for-a"));
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscriber_count_drops_when_receivers_drop() {
        let bus = InProcessBus::new();
        let rx = bus.subscribe("gone").await;
        assert_eq!(bus.subscriber_count("gone").await, 1);
        drop(rx);
        assert_eq!(bus.subscriber_count("gone").await, 0);
    }
}
