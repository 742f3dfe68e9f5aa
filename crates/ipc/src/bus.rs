//! A bounded, per-subscriber publish/subscribe bus, generic over a topic
//! key and a message type. Used in-process inside a single bot: producers
//! never block, and a subscriber whose queue fills up is shed rather than
//! slowing everyone else down.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};

/// Default per-subscriber queue depth.
pub const DEFAULT_CAPACITY: usize = 256;

struct Subscriber<M> {
    id: u64,
    tx: mpsc::Sender<M>,
}

struct Topic<M> {
    subscribers: Vec<Subscriber<M>>,
    shed_count: u64,
}

impl<M> Default for Topic<M> {
    fn default() -> Self {
        Self { subscribers: Vec::new(), shed_count: 0 }
    }
}

/// A publish/subscribe bus keyed by topic `K`, carrying messages `M`.
pub struct Bus<K, M> {
    topics: Arc<Mutex<HashMap<K, Topic<M>>>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl<K, M> Bus<K, M>
where
    K: Eq + Hash + Clone,
    M: Clone,
{
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to `topic`. Messages are preserved in publish order for
    /// this subscriber until either it is dropped or its queue overflows.
    pub async fn subscribe(&self, topic: K) -> Subscription<M> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut topics = self.topics.lock().await;
        topics.entry(topic).or_default().subscribers.push(Subscriber { id, tx });
        Subscription { id, rx }
    }

    /// Publish `message` to every live subscriber of `topic`. Non-blocking:
    /// a full subscriber queue sheds that subscriber and increments its
    /// topic's shed counter instead of waiting.
    pub async fn publish(&self, topic: &K, message: M) {
        let mut topics = self.topics.lock().await;
        let Some(entry) = topics.get_mut(topic) else {
            return;
        };
        entry.subscribers.retain_mut(|sub| match sub.tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                entry.shed_count += 1;
                tracing::warn!(subscriber_id = sub.id, "bus subscriber shed: queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Number of subscribers shed from `topic` so far, for metrics.
    pub async fn shed_count(&self, topic: &K) -> u64 {
        self.topics.lock().await.get(topic).map(|t| t.shed_count).unwrap_or(0)
    }

    pub async fn unsubscribe(&self, topic: &K, subscription_id: u64) {
        if let Some(entry) = self.topics.lock().await.get_mut(topic) {
            entry.subscribers.retain(|sub| sub.id != subscription_id);
        }
    }
}

impl<K, M> Default for Bus<K, M>
where
    K: Eq + Hash + Clone,
    M: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscription<M> {
    pub id: u64,
    rx: mpsc::Receiver<M>,
}

impl<M> Subscription<M> {
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum TestTopic {
        ChatInbound,
        ChatOutbound,
    }

    #[tokio::test]
    async fn publish_delivers_in_order_to_each_subscriber() {
        let bus: Bus<TestTopic, String> = Bus::new();
        let mut sub_a = bus.subscribe(TestTopic::ChatInbound).await;
        let mut sub_b = bus.subscribe(TestTopic::ChatInbound).await;

        bus.publish(&TestTopic::ChatInbound, "first".into()).await;
        bus.publish(&TestTopic::ChatInbound, "second".into()).await;

        assert_eq!(sub_a.recv().await, Some("first".into()));
        assert_eq!(sub_a.recv().await, Some("second".into()));
        assert_eq!(sub_b.recv().await, Some("first".into()));
        assert_eq!(sub_b.recv().await, Some("second".into()));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus: Bus<TestTopic, String> = Bus::new();
        let mut inbound = bus.subscribe(TestTopic::ChatInbound).await;
        bus.publish(&TestTopic::ChatOutbound, "outbound-only".into()).await;

        let result = tokio::time::timeout(std::time::Duration::from_millis(20), inbound.recv()).await;
        assert!(result.is_err(), "inbound subscriber should not see outbound publishes");
    }

    #[tokio::test]
    async fn slow_subscriber_is_shed_not_backpressured() {
        let bus: Bus<TestTopic, u32> = Bus::with_capacity(2);
        let mut slow = bus.subscribe(TestTopic::ChatInbound).await;

        for i in 0..5 {
            bus.publish(&TestTopic::ChatInbound, i).await;
        }

        assert_eq!(bus.shed_count(&TestTopic::ChatInbound).await, 1);
        assert_eq!(slow.recv().await, Some(0));
        assert_eq!(slow.recv().await, Some(1));
        assert_eq!(slow.recv().await, None, "subscriber was dropped from the topic after shedding");
    }

    #[tokio::test]
    async fn unsubscribe_stops_further_delivery() {
        let bus: Bus<TestTopic, String> = Bus::new();
        let sub = bus.subscribe(TestTopic::ChatInbound).await;
        bus.unsubscribe(&TestTopic::ChatInbound, sub.id).await;

        bus.publish(&TestTopic::ChatInbound, "missed".into()).await;
        let mut sub = sub;
        let result = tokio::time::timeout(std::time::Duration::from_millis(20), sub.recv()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_is_a_no_op() {
        let bus: Bus<TestTopic, String> = Bus::new();
        bus.publish(&TestTopic::ChatInbound, "no subscribers".into()).await;
    }
}
