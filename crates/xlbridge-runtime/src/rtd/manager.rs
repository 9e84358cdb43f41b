use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use xlbridge_core::Value;

use crate::error::RtdError;
use crate::metrics::BridgeMetrics;
use crate::rtd::publisher::{PublisherState, RtdPublisher};

/// Host-assigned id for one cell's subscription to a topic.
pub type TopicId = i64;

/// Notification that a topic has a new value. `value` is `None` when the
/// topic's publisher was dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicUpdate {
    pub topic: String,
    pub value: Option<Value>,
}

#[derive(Default)]
struct TopicRecord {
    publisher: Option<Arc<dyn RtdPublisher>>,
    subscribers: HashSet<TopicId>,
    value: Option<Value>,
}

#[derive(Default)]
struct Topics {
    records: HashMap<String, TopicRecord>,
    active_ids: HashMap<TopicId, String>,
    /// Publishers that were stopped but whose producer has not finished.
    cancelled: Vec<Arc<dyn RtdPublisher>>,
}

/// The topic table: publishers, subscriber ids and last values.
///
/// The table lock is never held while calling into a publisher, since
/// publishers call back into the manager.
pub struct RtdManager {
    topics: RwLock<Topics>,
    updates: broadcast::Sender<TopicUpdate>,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl RtdManager {
    pub fn new(update_capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(update_capacity.max(1));
        Self {
            topics: RwLock::new(Topics::default()),
            updates,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Topics> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Topics> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receiver for topic value notifications.
    pub fn updates(&self) -> broadcast::Receiver<TopicUpdate> {
        self.updates.subscribe()
    }

    fn notify(&self, topic: &str, value: Option<Value>) {
        // No receivers is fine; the value is still stored
        let _ = self.updates.send(TopicUpdate {
            topic: topic.to_string(),
            value,
        });
    }

    /// Store a new value for `topic` and notify. Values for topics with no
    /// record are discarded; returns whether the value was stored.
    pub fn publish(&self, topic: &str, value: Value) -> bool {
        {
            let mut topics = self.write();
            let Some(record) = topics.records.get_mut(topic) else {
                tracing::trace!(topic, "Discarding value for unknown topic");
                return false;
            };
            record.value = Some(value.clone());
        }
        if let Some(m) = &self.metrics {
            m.record_value_published();
        }
        self.notify(topic, Some(value));
        true
    }

    /// The topic's current value, creating an empty record if needed so a
    /// later `publish` is kept. `None` means the value is still pending.
    pub fn subscribe(&self, topic: &str) -> Option<Value> {
        let mut topics = self.write();
        topics.records.entry(topic.to_string()).or_default().value.clone()
    }

    /// The topic's current value without creating a record.
    pub fn value(&self, topic: &str) -> Option<Value> {
        self.read().records.get(topic).and_then(|r| r.value.clone())
    }

    /// The live publisher for `topic`. Stopped publishers are hidden so the
    /// caller starts a fresh one.
    pub fn peek(&self, topic: &str) -> Option<Arc<dyn RtdPublisher>> {
        let publisher = self.read().records.get(topic)?.publisher.clone()?;
        (publisher.state() != PublisherState::Stopped).then_some(publisher)
    }

    /// Install `publisher` under its topic, stopping any publisher it
    /// replaces. If the topic already has subscribers the new publisher is
    /// connected straight away.
    pub fn start(&self, publisher: Arc<dyn RtdPublisher>) {
        let topic = publisher.topic().to_string();
        let (previous, subscribers) = {
            let mut topics = self.write();
            let record = topics.records.entry(topic.clone()).or_default();
            let previous = record.publisher.replace(publisher.clone());
            let subscribers = record.subscribers.len();
            if let Some(prev) = &previous {
                topics.cancelled.push(prev.clone());
            }
            (previous, subscribers)
        };

        tracing::debug!(topic = %topic, replaced = previous.is_some(), "Starting publisher");
        if let Some(prev) = previous {
            prev.stop();
        }
        if subscribers > 0 {
            publisher.connect(subscribers);
        }
    }

    /// Link host subscription `topic_id` to `topic` and tell the publisher
    /// its new subscriber count.
    pub fn connect(&self, topic_id: TopicId, topic: &str) {
        tracing::trace!(topic, topic_id, "RTD connect");
        let (publisher, subscribers) = {
            let mut topics = self.write();
            let record = topics.records.entry(topic.to_string()).or_default();
            record.subscribers.insert(topic_id);
            let publisher = record.publisher.clone();
            let subscribers = record.subscribers.len();
            topics.active_ids.insert(topic_id, topic.to_string());
            (publisher, subscribers)
        };
        if let Some(publisher) = publisher {
            publisher.connect(subscribers);
        }
    }

    /// Remove host subscription `topic_id`. When the publisher reports it
    /// may be dropped, the whole topic record goes.
    pub fn disconnect(&self, topic_id: TopicId) -> Result<(), RtdError> {
        tracing::trace!(topic_id, "RTD disconnect");
        let (topic, publisher, subscribers, cancelled) = {
            let mut topics = self.write();
            let cancelled = std::mem::take(&mut topics.cancelled);
            let Some(topic) = topics.active_ids.remove(&topic_id) else {
                topics.cancelled = cancelled;
                return Err(RtdError::UnknownTopicId(topic_id));
            };
            let record = topics.records.entry(topic.clone()).or_default();
            record.subscribers.remove(&topic_id);
            let subscribers = record.subscribers.len();
            let publisher = record.publisher.clone();
            if publisher.is_none() && subscribers == 0 {
                topics.records.remove(&topic);
            }
            (topic, publisher, subscribers, cancelled)
        };

        // Prune cancelled publishers that have finished
        let still_running: Vec<_> = cancelled.into_iter().filter(|p| !p.done()).collect();

        let Some(publisher) = publisher else {
            self.write().cancelled.extend(still_running);
            return Ok(());
        };

        let mut retained = still_running;
        if publisher.disconnect(subscribers) {
            let done = publisher.done();
            if !done {
                publisher.stop();
                retained.push(publisher.clone());
            }
            let mut topics = self.write();
            // Only touch the record if it still belongs to this publisher
            let owned = topics
                .records
                .get_mut(&topic)
                .filter(|r| r.publisher.as_ref().is_some_and(|p| Arc::ptr_eq(p, &publisher)));
            if let Some(record) = owned {
                if record.subscribers.is_empty() {
                    topics.records.remove(&topic);
                    tracing::debug!(topic = %topic, "Publisher released");
                } else {
                    // A subscriber connected while the publisher was stopping.
                    // Keep the subscription; the next `start` connects to it.
                    record.publisher = None;
                    tracing::debug!(
                        topic = %topic,
                        subscribers = record.subscribers.len(),
                        "Publisher released, subscribers kept"
                    );
                }
            }
            topics.cancelled.extend(retained);
        } else {
            self.write().cancelled.extend(retained);
        }
        Ok(())
    }

    /// Stop and remove the topic's publisher, then publish an empty value.
    pub fn drop_publisher(&self, topic: &str) -> bool {
        let publisher = {
            let mut topics = self.write();
            match topics.records.get_mut(topic) {
                Some(record) => record.publisher.take(),
                None => return false,
            }
        };
        let Some(publisher) = publisher else {
            return false;
        };
        publisher.stop();
        if !publisher.done() {
            self.write().cancelled.push(publisher);
        }
        {
            let mut topics = self.write();
            if let Some(record) = topics.records.get_mut(topic) {
                record.value = None;
            }
        }
        self.notify(topic, None);
        true
    }

    /// Stop every publisher and forget all topics.
    pub fn clear(&self) {
        let publishers: Vec<Arc<dyn RtdPublisher>> = {
            let mut topics = self.write();
            let publishers = topics
                .records
                .drain()
                .filter_map(|(_, r)| r.publisher)
                .collect();
            topics.active_ids.clear();
            topics.cancelled.clear();
            publishers
        };
        tracing::info!(publishers = publishers.len(), "Clearing RTD topics");
        for publisher in publishers {
            publisher.stop();
        }
    }

    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().records.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.read().records.get(topic).map_or(0, |r| r.subscribers.len())
    }

    /// Stopped publishers still waiting for their producer to finish.
    pub fn pending_cancellations(&self) -> usize {
        self.read().cancelled.len()
    }
}

impl Default for RtdManager {
    fn default() -> Self {
        Self::new(1024)
    }
}
