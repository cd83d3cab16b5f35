//! Notification consumption loop
//!
//! One iteration per poll: build a pack over the polled batch, hand every
//! message to the handler, wait for the pack up to the processing timeout,
//! report stragglers and commit. Commit happens whether or not the pack
//! completed; nothing is redelivered by this loop.

use crate::error::{ConsumerError, ProcessingError};
use crate::handler::ConsumerHandler;
use crate::metrics::PackMetrics;
use crate::pack::PackTracker;
use crate::queue::QueueConsumer;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Outcome of one processed pack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackSummary {
    /// Messages in the pack
    pub size: usize,
    /// Whether every message reported back before the timeout
    pub completed: bool,
    pub succeeded: usize,
    pub failed: usize,
    /// Messages still pending when the wait ended
    pub timed_out: usize,
}

/// Drives the notification queue through a `ConsumerHandler`.
pub struct NotificationLoop<H: ConsumerHandler> {
    handler: Arc<H>,
    consumer: Arc<dyn QueueConsumer<H::Notification>>,
    shutdown: CancellationToken,
    metrics: PackMetrics,
}

impl<H: ConsumerHandler> NotificationLoop<H> {
    pub fn new(
        handler: Arc<H>,
        consumer: Arc<dyn QueueConsumer<H::Notification>>,
        shutdown: CancellationToken,
    ) -> Self {
        let metrics = PackMetrics::new(consumer.topic());
        Self {
            handler,
            consumer,
            shutdown,
            metrics,
        }
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// Never returns early on error: poll and commit failures back off for
    /// one poll duration and the loop carries on.
    pub async fn run(self) {
        info!(
            topic = %self.metrics.topic(),
            poll_ms = %self.handler.notification_poll_duration().as_millis(),
            pack_timeout_ms = %self.handler.notification_pack_processing_timeout().as_millis(),
            "Starting notifications consumer"
        );

        while !self.shutdown.is_cancelled() {
            if let Err(e) = self.poll_once().await {
                if self.shutdown.is_cancelled() {
                    trace!(error = %e, "Notification poll failed during shutdown");
                    break;
                }

                warn!(error = %e, "Failed to obtain notifications from queue");
                self.metrics.poll_failed();

                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        trace!("Interrupted while backing off after a failed notification poll");
                    }
                    _ = tokio::time::sleep(self.handler.notification_poll_duration()) => {}
                }
            }
        }

        info!(topic = %self.metrics.topic(), "Notifications consumer stopped");
    }

    /// Run a single poll cycle.
    ///
    /// Returns `None` when the poll was empty or shutdown interrupted the
    /// cycle; in both cases nothing is committed.
    pub async fn poll_once(&self) -> Result<Option<PackSummary>, ConsumerError> {
        let poll_duration = self.handler.notification_poll_duration();

        let polled = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(None),
            polled = self.consumer.poll(poll_duration) => polled,
        };
        let msgs = polled?;

        if msgs.is_empty() {
            return Ok(None);
        }

        let tracker = PackTracker::new(msgs);
        self.metrics.pack_polled(tracker.len());
        self.dispatch(&tracker);

        let started = Instant::now();
        let pack_timeout = self.handler.notification_pack_processing_timeout();
        let completed = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                trace!(size = tracker.len(), "Shutdown while waiting for notification pack");
                return Ok(None);
            }
            completed = tracker.await_completion(pack_timeout) => completed,
        };

        let snapshot = tracker.snapshot();
        if !completed {
            for (id, msg) in &snapshot.pending {
                warn!(correlation_id = %id, msg = %msg, "Timeout to process notification");
            }
            for (id, failed) in &snapshot.failed {
                warn!(
                    correlation_id = %id,
                    msg = %failed.msg,
                    error = %failed.cause,
                    "Failed to process notification"
                );
            }
        }

        let summary = PackSummary {
            size: snapshot.len(),
            completed,
            succeeded: snapshot.succeeded.len(),
            failed: snapshot.failed.len(),
            timed_out: snapshot.pending.len(),
        };
        self.metrics.pack_finished(
            summary.succeeded,
            summary.failed,
            summary.timed_out,
            started.elapsed(),
        );

        self.consumer.commit().await?;
        Ok(Some(summary))
    }

    /// Hand every message of the pack to the handler.
    ///
    /// A handler error or panic is turned into a failure outcome, so the
    /// message never stays pending because of it.
    fn dispatch(&self, tracker: &PackTracker<H::Notification>) {
        for (id, msg) in tracker.entries() {
            debug!(correlation_id = %id, msg = %msg, "Creating notification callback");
            let callback = tracker.callback(*id);

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.handler
                    .handle_notification(*id, Arc::clone(msg), callback.clone())
            }))
            .unwrap_or_else(|payload| Err(ProcessingError::from_panic(payload)));

            if let Err(e) = result {
                warn!(
                    correlation_id = %id,
                    msg = %msg,
                    error = %e,
                    "Failed to process notification"
                );
                callback.on_failure(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryQueueConsumer;
    use crate::msg::QueueMsg;
    use crate::pack::PackCallback;
    use crate::partition::ServiceType;
    use async_trait::async_trait;
    use std::io;
    use std::time::Duration;
    use tracing::subscriber::DefaultGuard;
    use tracing_subscriber::fmt::MakeWriter;
    use uuid::Uuid;

    /// Shared buffer collecting formatted log lines.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn count(&self, line: &str) -> usize {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .matches(line)
                .count()
        }
    }

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Route warnings of the current thread into a buffer until the guard drops.
    fn capture_warnings() -> (LogBuffer, DefaultGuard) {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    /// Handler whose behaviour is picked by the payload.
    struct ScriptedHandler;

    #[async_trait]
    impl ConsumerHandler for ScriptedHandler {
        type Main = ();
        type Notification = &'static str;

        fn service_type(&self) -> ServiceType {
            ServiceType::TbCore
        }

        async fn run_main_consumer(
            &self,
            _consumer: Arc<dyn QueueConsumer<()>>,
            _shutdown: CancellationToken,
        ) {
        }

        fn notification_poll_duration(&self) -> Duration {
            Duration::from_millis(5)
        }

        fn notification_pack_processing_timeout(&self) -> Duration {
            Duration::from_millis(50)
        }

        fn handle_notification(
            &self,
            _id: Uuid,
            msg: Arc<QueueMsg<&'static str>>,
            callback: PackCallback,
        ) -> Result<(), ProcessingError> {
            match msg.value {
                "ok" => {
                    callback.on_success();
                    Ok(())
                }
                "ok-later" => {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        callback.on_success();
                    });
                    Ok(())
                }
                "fail" => {
                    callback.on_failure("rejected by handler");
                    Ok(())
                }
                "error" => Err(ProcessingError::failed("handler error")),
                "panic" => panic!("handler panicked"),
                _ => Ok(()),
            }
        }
    }

    fn setup(
        batches: Vec<Vec<&'static str>>,
    ) -> (Arc<InMemoryQueueConsumer<&'static str>>, NotificationLoop<ScriptedHandler>) {
        let queue = Arc::new(InMemoryQueueConsumer::new("tb_core.notifications"));
        queue.subscribe();
        for batch in batches {
            queue.push_batch(batch.into_iter().map(QueueMsg::with_random_key).collect());
        }
        let nf_loop = NotificationLoop::<ScriptedHandler>::new(
            Arc::new(ScriptedHandler),
            queue.clone(),
            CancellationToken::new(),
        );
        (queue, nf_loop)
    }

    #[tokio::test]
    async fn test_completed_pack_is_committed() {
        let (queue, nf_loop) = setup(vec![vec!["ok", "ok-later", "fail"]]);

        let summary = nf_loop.poll_once().await.unwrap().unwrap();
        assert_eq!(
            summary,
            PackSummary {
                size: 3,
                completed: true,
                succeeded: 2,
                failed: 1,
                timed_out: 0,
            }
        );
        assert_eq!(queue.committed_batches(), vec![3]);
    }

    #[tokio::test]
    async fn test_stragglers_time_out_and_pack_is_still_committed() {
        let (queue, nf_loop) = setup(vec![vec!["ok", "silent", "ok-later"]]);

        let started = Instant::now();
        let summary = nf_loop.poll_once().await.unwrap().unwrap();

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(!summary.completed);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(queue.committed_batches(), vec![3]);
    }

    #[tokio::test]
    async fn test_completed_pack_logs_no_timeouts() {
        let (logs, _guard) = capture_warnings();
        let (_queue, nf_loop) = setup(vec![vec!["ok", "ok-later", "fail"]]);

        let summary = nf_loop.poll_once().await.unwrap().unwrap();

        assert!(summary.completed);
        assert_eq!(logs.count("Timeout to process notification"), 0);
        assert_eq!(logs.count("Failed to process notification"), 0);
    }

    #[tokio::test]
    async fn test_timed_out_pack_logs_each_straggler_and_failure() {
        let (logs, _guard) = capture_warnings();
        let (queue, nf_loop) = setup(vec![vec!["ok", "silent", "fail", "silent"]]);

        let summary = nf_loop.poll_once().await.unwrap().unwrap();

        assert!(!summary.completed);
        assert_eq!(summary.timed_out, 2);
        assert_eq!(logs.count("Timeout to process notification"), 2);
        assert_eq!(logs.count("Failed to process notification"), 1);
        assert_eq!(queue.committed_batches(), vec![4]);
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_are_recorded_as_failures() {
        let (queue, nf_loop) = setup(vec![vec!["error", "ok", "panic", "ok"]]);

        let summary = nf_loop.poll_once().await.unwrap().unwrap();
        assert!(summary.completed);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(queue.committed_batches(), vec![4]);
    }

    #[tokio::test]
    async fn test_empty_poll_is_not_committed() {
        let (queue, nf_loop) = setup(vec![]);

        assert!(nf_loop.poll_once().await.unwrap().is_none());
        assert!(queue.committed_batches().is_empty());
    }

    #[tokio::test]
    async fn test_poll_error_is_returned() {
        let (queue, nf_loop) = setup(vec![]);
        queue.push_error("connection reset");

        let err = nf_loop.poll_once().await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert!(queue.committed_batches().is_empty());
    }

    #[tokio::test]
    async fn test_run_backs_off_after_poll_error_and_recovers() {
        let queue = Arc::new(InMemoryQueueConsumer::new("tb_core.notifications"));
        queue.subscribe();
        queue.push_error("connection reset");
        queue.push_batch(vec![QueueMsg::with_random_key("ok")]);

        let shutdown = CancellationToken::new();
        let nf_loop = NotificationLoop::<ScriptedHandler>::new(
            Arc::new(ScriptedHandler),
            queue.clone(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(nf_loop.run());

        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(queue.committed_batches(), vec![1]);
        assert_eq!(queue.remaining(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_preempts_pack_wait() {
        let (queue, _) = setup(vec![]);
        queue.push_batch(vec![QueueMsg::with_random_key("silent")]);

        let shutdown = CancellationToken::new();
        let nf_loop = NotificationLoop::<ScriptedHandler>::new(
            Arc::new(ScriptedHandler),
            queue.clone(),
            shutdown.clone(),
        );

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        assert!(nf_loop.poll_once().await.unwrap().is_none());
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(queue.committed_batches().is_empty());
    }
}
