//! Consumer handler trait
//!
//! The service-specific half of a consumer. The core owns channels, execution
//! contexts, pack tracking and shutdown; the handler supplies the identity,
//! the timings, the main loop and the notification logic.

use crate::error::ProcessingError;
use crate::msg::QueueMsg;
use crate::pack::PackCallback;
use crate::partition::ServiceType;
use crate::queue::QueueConsumer;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Service-specific behaviour plugged into a `ConsumerService`.
///
/// # Example
///
/// ```rust,ignore
/// use queue_consumer::{ConsumerHandler, PackCallback, ProcessingError, QueueMsg, ServiceType};
///
/// struct CoreHandler { actors: ActorSystem }
///
/// #[async_trait]
/// impl ConsumerHandler for CoreHandler {
///     type Main = ToCoreMsg;
///     type Notification = ToCoreNotification;
///
///     fn service_type(&self) -> ServiceType {
///         ServiceType::TbCore
///     }
///
///     async fn run_main_consumer(
///         &self,
///         consumer: Arc<dyn QueueConsumer<ToCoreMsg>>,
///         shutdown: CancellationToken,
///     ) {
///         while !shutdown.is_cancelled() { /* poll, route, commit */ }
///     }
///
///     fn notification_poll_duration(&self) -> Duration {
///         Duration::from_millis(25)
///     }
///
///     fn notification_pack_processing_timeout(&self) -> Duration {
///         Duration::from_secs(60)
///     }
///
///     fn handle_notification(
///         &self,
///         id: Uuid,
///         msg: Arc<QueueMsg<ToCoreNotification>>,
///         callback: PackCallback,
///     ) -> Result<(), ProcessingError> {
///         self.actors.tell(msg, callback);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ConsumerHandler: Send + Sync + 'static {
    /// Payload of the partitioned main queue.
    type Main: Send + Sync + 'static;

    /// Payload of the broadcast notification queue.
    type Notification: Debug + Send + Sync + 'static;

    /// Service type used to filter partition-change events.
    fn service_type(&self) -> ServiceType;

    /// Run the main-queue loop until `shutdown` is cancelled.
    ///
    /// Called once, on the main consumer executor. The core re-subscribes
    /// `consumer` whenever the partition assignment changes.
    async fn run_main_consumer(
        &self,
        consumer: Arc<dyn QueueConsumer<Self::Main>>,
        shutdown: CancellationToken,
    );

    /// Maximum wait of a notification poll; also the backoff after a poll failure.
    fn notification_poll_duration(&self) -> Duration;

    /// How long a notification pack may take before stragglers are reported.
    fn notification_pack_processing_timeout(&self) -> Duration;

    /// Dispatch one notification.
    ///
    /// Called on the notification executor, once per message and in poll
    /// order. The handler may complete the message later from any task but
    /// must call `callback` exactly once if it returns `Ok`. Returning `Err`
    /// (or panicking) marks the message failed.
    fn handle_notification(
        &self,
        id: Uuid,
        msg: Arc<QueueMsg<Self::Notification>>,
        callback: PackCallback,
    ) -> Result<(), ProcessingError>;
}
