//! Consumer lifecycle
//!
//! `ConsumerService` owns both queue clients and their execution contexts:
//!
//! ```text
//! init(main, nf)           -> two named single-worker executors
//! on_application_ready()   -> subscribe notifications, launch both loops
//! on_partition_change(ev)  -> re-subscribe the main queue (any task)
//! destroy()                -> cancel, unsubscribe both, abandon executors
//! ```

use crate::error::ConsumerError;
use crate::executor::ConsumerExecutor;
use crate::handler::ConsumerHandler;
use crate::notifications::NotificationLoop;
use crate::partition::{PartitionChangeEvent, PartitionEventBus};
use crate::queue::QueueConsumer;
use crate::reactor::PartitionReactor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Default)]
struct Executors {
    main: Option<ConsumerExecutor>,
    notifications: Option<ConsumerExecutor>,
    started: bool,
}

/// Runs the main and notification consumers of one service.
pub struct ConsumerService<H: ConsumerHandler> {
    handler: Arc<H>,
    main_consumer: Arc<dyn QueueConsumer<H::Main>>,
    nf_consumer: Arc<dyn QueueConsumer<H::Notification>>,
    reactor: PartitionReactor<H::Main>,
    executors: Mutex<Executors>,
    shutdown: CancellationToken,
}

impl<H: ConsumerHandler> ConsumerService<H> {
    pub fn new(
        handler: Arc<H>,
        main_consumer: Arc<dyn QueueConsumer<H::Main>>,
        nf_consumer: Arc<dyn QueueConsumer<H::Notification>>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let reactor = PartitionReactor::new(
            handler.service_type(),
            Arc::clone(&main_consumer),
            shutdown.clone(),
        );

        Self {
            handler,
            main_consumer,
            nf_consumer,
            reactor,
            executors: Mutex::new(Executors::default()),
            shutdown,
        }
    }

    fn executors(&self) -> MutexGuard<'_, Executors> {
        self.executors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the two execution contexts.
    pub fn init(
        &self,
        main_thread_name: &str,
        notifications_thread_name: &str,
    ) -> Result<(), ConsumerError> {
        if self.is_stopped() {
            return Err(ConsumerError::Stopped);
        }

        let mut executors = self.executors();
        if executors.started {
            return Err(ConsumerError::AlreadyStarted);
        }

        executors.main = Some(ConsumerExecutor::single_threaded(main_thread_name)?);
        executors.notifications =
            Some(ConsumerExecutor::single_threaded(notifications_thread_name)?);

        info!(
            service_type = %self.handler.service_type(),
            main = %main_thread_name,
            notifications = %notifications_thread_name,
            "Consumer executors initialized"
        );
        Ok(())
    }

    /// Subscribe the notification queue and launch both loops.
    ///
    /// The notification queue is always consumed as a broadcast topic.
    pub fn on_application_ready(&self) -> Result<(), ConsumerError> {
        if self.is_stopped() {
            return Err(ConsumerError::Stopped);
        }

        let mut executors = self.executors();
        if executors.started {
            return Err(ConsumerError::AlreadyStarted);
        }
        let (Some(main), Some(notifications)) = (&executors.main, &executors.notifications) else {
            return Err(ConsumerError::NotInitialized);
        };

        info!(topic = %self.nf_consumer.topic(), "Subscribing to notifications");
        self.nf_consumer.subscribe();

        let nf_loop = NotificationLoop::new(
            Arc::clone(&self.handler),
            Arc::clone(&self.nf_consumer),
            self.shutdown.clone(),
        );
        notifications.execute(nf_loop.run())?;

        let handler = Arc::clone(&self.handler);
        let consumer = Arc::clone(&self.main_consumer);
        let shutdown = self.shutdown.clone();
        main.execute(async move {
            handler.run_main_consumer(consumer, shutdown).await;
            info!("Main consumer stopped");
        })?;

        executors.started = true;
        Ok(())
    }

    /// Apply a partition assignment change to the main queue.
    ///
    /// Returns `true` if the main queue was re-subscribed.
    pub fn on_partition_change(&self, event: &PartitionChangeEvent) -> bool {
        self.reactor.on_partition_change(event)
    }

    /// Register on `bus` and apply its events until shutdown.
    ///
    /// The listener runs on the caller's runtime, never on the consumer
    /// executors.
    pub fn listen_partition_events(&self, bus: &PartitionEventBus) -> JoinHandle<()> {
        self.reactor.clone().listen(bus.subscribe())
    }

    /// Stop both loops.
    ///
    /// Cancels the shutdown token, unsubscribes both queues and terminates both
    /// executors without draining in-flight packs. Only the first call has an
    /// effect.
    pub fn destroy(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        self.main_consumer.unsubscribe();
        self.nf_consumer.unsubscribe();

        let mut executors = self.executors();
        for executor in [executors.main.take(), executors.notifications.take()]
            .into_iter()
            .flatten()
        {
            executor.shutdown_now();
        }

        if executors.started {
            info!(service_type = %self.handler.service_type(), "Consumer service stopped");
        } else {
            warn!(
                service_type = %self.handler.service_type(),
                "Consumer service stopped before it was started"
            );
        }
    }

    /// Whether `destroy` has been called
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled by `destroy`
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }
}

impl<H: ConsumerHandler> Drop for ConsumerService<H> {
    fn drop(&mut self) {
        self.destroy();
    }
}
