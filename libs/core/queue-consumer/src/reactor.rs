//! Partition subscription reactor
//!
//! Re-subscribes the main queue whenever the partition assignment of this
//! node's service type changes. Runs on whatever task delivers the event and
//! never waits on the main loop.

use crate::partition::{PartitionChangeEvent, ServiceType};
use crate::queue::QueueConsumer;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Applies partition-change events to the main queue subscription.
pub struct PartitionReactor<M: Send + Sync + 'static> {
    service_type: ServiceType,
    consumer: Arc<dyn QueueConsumer<M>>,
    shutdown: CancellationToken,
}

impl<M: Send + Sync + 'static> Clone for PartitionReactor<M> {
    fn clone(&self) -> Self {
        Self {
            service_type: self.service_type,
            consumer: Arc::clone(&self.consumer),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<M: Send + Sync + 'static> PartitionReactor<M> {
    pub fn new(
        service_type: ServiceType,
        consumer: Arc<dyn QueueConsumer<M>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            service_type,
            consumer,
            shutdown,
        }
    }

    /// Service type whose events are applied
    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// Apply one event.
    ///
    /// Returns `true` if the main queue was re-subscribed. Events addressed to
    /// another service type, and events arriving after shutdown, are ignored.
    pub fn on_partition_change(&self, event: &PartitionChangeEvent) -> bool {
        if event.service_type() != self.service_type {
            debug!(
                own = %self.service_type,
                target = %event.service_type(),
                "Ignoring partition change for another service type"
            );
            return false;
        }

        if self.shutdown.is_cancelled() {
            trace!("Ignoring partition change after shutdown");
            return false;
        }

        info!(
            topic = %self.consumer.topic(),
            queue = %event.service_key.queue_name,
            partitions = %event.partition_names(),
            "Subscribing to partitions"
        );
        self.consumer.subscribe_partitions(event.partitions.clone());
        true
    }

    /// Apply every event from `events` on the current runtime until shutdown
    /// or until the bus is dropped.
    pub fn listen(self, mut events: broadcast::Receiver<PartitionChangeEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    received = events.recv() => received,
                };

                match received {
                    Ok(event) => {
                        self.on_partition_change(&event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Partition listener lagged behind, events were dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(service_type = %self.service_type, "Partition listener stopped");
        })
    }
}
