//! In-memory queue client
//!
//! A scripted `QueueConsumer` for tests and local development. Batches and
//! poll errors are queued up front (or pushed while running) and handed out
//! one per `poll` call, as long as the client is subscribed.

use crate::error::ConsumerError;
use crate::msg::QueueMsg;
use crate::partition::PartitionSet;
use crate::queue::QueueConsumer;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Subscription state of an in-memory client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    /// Not subscribed; polls return nothing.
    None,
    /// Subscribed to the whole topic.
    Broadcast,
    /// Subscribed to an explicit partition set.
    Partitions(PartitionSet),
}

#[derive(Debug)]
struct State<T> {
    subscription: Subscription,
    scripted: VecDeque<Result<Vec<QueueMsg<T>>, String>>,
    last_polled: usize,
    committed: Vec<usize>,
    partition_history: Vec<PartitionSet>,
}

/// Scripted queue client backed by an in-process deque.
#[derive(Debug)]
pub struct InMemoryQueueConsumer<T> {
    topic: String,
    state: Mutex<State<T>>,
    available: Notify,
    poll_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
}

impl<T> InMemoryQueueConsumer<T> {
    /// Create an unsubscribed client for `topic`
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            state: Mutex::new(State {
                subscription: Subscription::None,
                scripted: VecDeque::new(),
                last_polled: 0,
                committed: Vec::new(),
                partition_history: Vec::new(),
            }),
            available: Notify::new(),
            poll_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a batch to be returned by a future poll
    pub fn push_batch(&self, batch: Vec<QueueMsg<T>>) {
        self.state().scripted.push_back(Ok(batch));
        self.available.notify_waiters();
    }

    /// Queue a poll failure
    pub fn push_error(&self, message: impl Into<String>) {
        self.state().scripted.push_back(Err(message.into()));
        self.available.notify_waiters();
    }

    /// Batches and errors not yet handed out
    pub fn remaining(&self) -> usize {
        self.state().scripted.len()
    }

    /// Current subscription
    pub fn subscription(&self) -> Subscription {
        self.state().subscription.clone()
    }

    /// Every partition set this client was subscribed to, oldest first
    pub fn partition_history(&self) -> Vec<PartitionSet> {
        self.state().partition_history.clone()
    }

    /// Size of every committed batch, oldest first
    pub fn committed_batches(&self) -> Vec<usize> {
        self.state().committed.clone()
    }

    /// Number of `poll` calls so far
    pub fn poll_count(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    /// Number of `subscribe`/`subscribe_partitions` calls so far
    pub fn subscribe_count(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of `unsubscribe` calls so far
    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    fn take_next(&self) -> Option<Result<Vec<QueueMsg<T>>, ConsumerError>> {
        let mut state = self.state();
        if state.subscription == Subscription::None {
            return None;
        }
        let next = state.scripted.pop_front()?;
        Some(match next {
            Ok(batch) => {
                state.last_polled = batch.len();
                Ok(batch)
            }
            Err(message) => Err(ConsumerError::Queue(message)),
        })
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> QueueConsumer<T> for InMemoryQueueConsumer<T> {
    fn topic(&self) -> String {
        self.topic.clone()
    }

    fn subscribe(&self) {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.state().subscription = Subscription::Broadcast;
        self.available.notify_waiters();
    }

    fn subscribe_partitions(&self, partitions: PartitionSet) {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        state.partition_history.push(partitions.clone());
        state.subscription = Subscription::Partitions(partitions);
        drop(state);
        self.available.notify_waiters();
    }

    fn unsubscribe(&self) {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.state().subscription = Subscription::None;
    }

    async fn poll(&self, max_wait: Duration) -> Result<Vec<QueueMsg<T>>, ConsumerError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);

        let deadline = Instant::now() + max_wait;
        loop {
            // Registered before the check so a push in between is not missed
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(next) = self.take_next() {
                return next;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(&self) -> Result<(), ConsumerError> {
        let mut state = self.state();
        let size = state.last_polled;
        state.committed.push(size);
        state.last_polled = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::TopicPartitionInfo;

    #[tokio::test]
    async fn test_unsubscribed_poll_returns_nothing() {
        let queue = InMemoryQueueConsumer::new("tb_core.notifications");
        queue.push_batch(vec![QueueMsg::with_random_key(1u32)]);

        let batch = queue.poll(Duration::from_millis(5)).await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(queue.remaining(), 1);
        assert_eq!(queue.poll_count(), 1);
    }

    #[tokio::test]
    async fn test_poll_and_commit() {
        let queue = InMemoryQueueConsumer::new("tb_core.notifications");
        queue.subscribe();
        queue.push_batch(vec![
            QueueMsg::with_random_key(1u32),
            QueueMsg::with_random_key(2u32),
        ]);

        let batch = queue.poll(Duration::from_millis(5)).await.unwrap();
        assert_eq!(batch.len(), 2);
        queue.commit().await.unwrap();

        assert_eq!(queue.committed_batches(), vec![2]);
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let queue: InMemoryQueueConsumer<u32> = InMemoryQueueConsumer::new("t");
        queue.subscribe();
        queue.push_error("broker unavailable");

        let err = queue.poll(Duration::from_millis(5)).await.unwrap_err();
        assert!(err.to_string().contains("broker unavailable"));
    }

    #[tokio::test]
    async fn test_poll_wakes_on_push() {
        let queue = std::sync::Arc::new(InMemoryQueueConsumer::new("t"));
        queue.subscribe();

        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.push_batch(vec![QueueMsg::with_random_key(7u32)]);
        });

        let batch = queue.poll(Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].value, 7);
    }

    #[tokio::test]
    async fn test_empty_poll_after_subscribe_waits_for_max_wait() {
        let queue: InMemoryQueueConsumer<u32> = InMemoryQueueConsumer::new("t");
        queue.subscribe();
        queue.subscribe_partitions([TopicPartitionInfo::new("t", Some(0))].into());

        let started = std::time::Instant::now();
        let batch = queue.poll(Duration::from_millis(50)).await.unwrap();

        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_subscribe_wakes_waiting_poll() {
        let queue = std::sync::Arc::new(InMemoryQueueConsumer::new("t"));
        queue.push_batch(vec![QueueMsg::with_random_key(3u32)]);

        let subscriber = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            subscriber.subscribe();
        });

        let batch = queue.poll(Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_partition_subscription_replaces_previous() {
        let queue: InMemoryQueueConsumer<u32> = InMemoryQueueConsumer::new("tb_core");
        let first: PartitionSet = [TopicPartitionInfo::new("tb_core", Some(0))].into();
        let second: PartitionSet = [TopicPartitionInfo::new("tb_core", Some(1))].into();

        queue.subscribe_partitions(first.clone());
        queue.subscribe_partitions(second.clone());

        assert_eq!(queue.subscription(), Subscription::Partitions(second.clone()));
        assert_eq!(queue.partition_history(), vec![first, second]);

        queue.unsubscribe();
        assert_eq!(queue.subscription(), Subscription::None);
        assert_eq!(queue.unsubscribe_count(), 1);
    }
}
