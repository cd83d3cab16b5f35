//! Queue Consumer Core
//!
//! Lifecycle and notification-pack processing shared by every node type that
//! consumes a partitioned main queue plus a broadcast notification queue.
//!
//! ## Features
//!
//! - **Two execution contexts**: each loop runs on its own named single-worker runtime
//! - **Pack processing**: notifications are dispatched together and awaited with a timeout
//! - **Partition reactor**: the main queue follows assignment changes for its service type
//! - **Forceful shutdown**: `destroy` unsubscribes both queues and abandons in-flight work
//! - **Prometheus metrics**: pack sizes, outcomes and wait times
//!
//! ## Example
//!
//! ```ignore
//! use queue_consumer::{ConsumerService, PartitionEventBus};
//!
//! let service = ConsumerService::new(Arc::new(handler), main_consumer, nf_consumer);
//! service.init("tb-core-consumer", "tb-core-notifications-consumer")?;
//!
//! let bus = PartitionEventBus::default();
//! let listener = service.listen_partition_events(&bus);
//!
//! service.on_application_ready()?;
//! shutdown_signal().await;
//! service.destroy();
//! ```

mod error;
mod executor;
mod handler;
mod memory;
pub mod metrics;
mod msg;
mod notifications;
mod pack;
mod partition;
mod queue;
mod reactor;
mod service;

// Re-export main types
pub use error::{ConsumerError, ProcessingError};
pub use executor::ConsumerExecutor;
pub use handler::ConsumerHandler;
pub use memory::{InMemoryQueueConsumer, Subscription};
pub use metrics::{init_metrics, PackMetrics};
pub use msg::{MsgHeaders, QueueMsg};
pub use notifications::{NotificationLoop, PackSummary};
pub use pack::{FailedEntry, PackCallback, PackSnapshot, PackTracker};
pub use partition::{
    PartitionChangeEvent, PartitionEventBus, PartitionSet, ServiceQueueKey, ServiceType,
    TopicPartitionInfo,
};
pub use queue::QueueConsumer;
pub use reactor::PartitionReactor;
pub use service::ConsumerService;

// Re-exported so handlers can name the shutdown token without a direct dependency
pub use tokio_util::sync::CancellationToken;
