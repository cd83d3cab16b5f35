//! Queue client abstraction
//!
//! The consumer core drives any broker through this trait. A client owns one
//! topic, keeps its own subscription state and remembers the batch returned by
//! the last `poll` so that `commit` can acknowledge it.

use crate::error::ConsumerError;
use crate::msg::QueueMsg;
use crate::partition::PartitionSet;
use async_trait::async_trait;
use std::time::Duration;

/// Queue client used by both consumption loops.
///
/// `subscribe*` and `unsubscribe` may be called from a different task than
/// the one polling, so implementations must keep their subscription state
/// behind interior synchronization.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueConsumer<T: Send + Sync + 'static>: Send + Sync {
    /// Topic this client consumes.
    fn topic(&self) -> String;

    /// Subscribe to every partition of the topic (broadcast consumption).
    fn subscribe(&self);

    /// Replace the subscription with exactly `partitions`.
    fn subscribe_partitions(&self, partitions: PartitionSet);

    /// Drop the subscription. Subsequent polls return no messages.
    fn unsubscribe(&self);

    /// Wait up to `max_wait` for a batch of messages.
    ///
    /// Returns an empty batch on timeout.
    async fn poll(&self, max_wait: Duration) -> Result<Vec<QueueMsg<T>>, ConsumerError>;

    /// Acknowledge the batch returned by the last `poll`.
    async fn commit(&self) -> Result<(), ConsumerError>;
}
