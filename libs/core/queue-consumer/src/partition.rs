//! Service identity, partition assignment and partition-change delivery.
//!
//! This module provides:
//! - `ServiceType` enum identifying which kind of node an assignment targets
//! - `TopicPartitionInfo` describing one assigned partition of the main queue
//! - `PartitionChangeEvent` carrying a full replacement assignment
//! - `PartitionEventBus` publishing assignment changes to every registered consumer

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use tokio::sync::broadcast;
use tracing::debug;

/// Kind of service a node runs as.
///
/// Partition-change events are addressed to a service type, and a consumer
/// only reacts to events addressed to its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    /// Core node: device state, subscriptions, RPC.
    TbCore,
    /// Rule engine node.
    TbRuleEngine,
    /// Transport node (MQTT, HTTP, CoAP).
    TbTransport,
    /// Remote script executor.
    JsExecutor,
}

impl ServiceType {
    /// Get all service types.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }
}

/// Key of the queue an assignment belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceQueueKey {
    pub service_type: ServiceType,
    pub queue_name: String,
}

impl ServiceQueueKey {
    pub fn new(service_type: ServiceType, queue_name: impl Into<String>) -> Self {
        Self {
            service_type,
            queue_name: queue_name.into(),
        }
    }
}

/// One partition of a topic.
///
/// `partition` is `None` for topics that are consumed without partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartitionInfo {
    pub topic: String,
    pub partition: Option<u32>,
}

impl TopicPartitionInfo {
    pub fn new(topic: impl Into<String>, partition: Option<u32>) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    /// Topic name with the partition suffix, as used by the broker.
    pub fn full_topic_name(&self) -> String {
        match self.partition {
            Some(partition) => format!("{}.{}", self.topic, partition),
            None => self.topic.clone(),
        }
    }
}

impl fmt::Display for TopicPartitionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_topic_name())
    }
}

/// Current partition assignment of a node.
pub type PartitionSet = BTreeSet<TopicPartitionInfo>;

/// A new partition assignment for one service queue.
///
/// The carried set replaces the previous assignment wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionChangeEvent {
    pub service_key: ServiceQueueKey,
    pub partitions: PartitionSet,
}

impl PartitionChangeEvent {
    pub fn new(
        service_key: ServiceQueueKey,
        partitions: impl IntoIterator<Item = TopicPartitionInfo>,
    ) -> Self {
        Self {
            service_key,
            partitions: partitions.into_iter().collect(),
        }
    }

    /// Service type this event is addressed to.
    pub fn service_type(&self) -> ServiceType {
        self.service_key.service_type
    }

    /// Comma separated partition names, for logs.
    pub fn partition_names(&self) -> String {
        self.partitions
            .iter()
            .map(TopicPartitionInfo::full_topic_name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Publish/subscribe bus for partition assignment changes.
///
/// Every subscriber receives every event; filtering by service type happens
/// on the receiving side.
#[derive(Debug, Clone)]
pub struct PartitionEventBus {
    sender: broadcast::Sender<PartitionChangeEvent>,
}

impl PartitionEventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event, returning how many subscribers received it.
    pub fn publish(&self, event: PartitionChangeEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!(
                    service_type = %event.service_type(),
                    "No subscribers for partition change event"
                );
                0
            }
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<PartitionChangeEvent> {
        self.sender.subscribe()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PartitionEventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
