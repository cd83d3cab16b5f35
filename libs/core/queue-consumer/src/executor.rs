//! Dedicated execution contexts
//!
//! Each consumption loop runs on its own single-worker tokio runtime so that a
//! slow main loop never delays notifications and vice versa. Threads carry the
//! configured name, which makes them easy to spot in thread dumps and logs.

use crate::error::ConsumerError;
use std::future::Future;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

/// A named runtime with exactly one worker thread.
///
/// Dropping the executor has the same effect as `shutdown_now`.
#[derive(Debug)]
pub struct ConsumerExecutor {
    name: String,
    runtime: Option<Runtime>,
}

impl ConsumerExecutor {
    /// Build a runtime whose threads are named `name`
    pub fn single_threaded(name: impl Into<String>) -> Result<Self, ConsumerError> {
        let name = name.into();
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(name.clone())
            .enable_all()
            .build()?;

        debug!(executor = %name, "Created consumer executor");
        Ok(Self {
            name,
            runtime: Some(runtime),
        })
    }

    /// Executor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `task` on this executor
    pub fn execute<F>(&self, task: F) -> Result<JoinHandle<()>, ConsumerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime
            .as_ref()
            .map(|runtime| runtime.spawn(task))
            .ok_or(ConsumerError::Stopped)
    }

    /// Stop the executor without waiting for running tasks.
    ///
    /// Tasks are dropped at their next suspension point. Safe to call from
    /// async code, including from a task of this executor.
    pub fn shutdown_now(mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            debug!(executor = %self.name, "Shutting down consumer executor");
            runtime.shutdown_background();
        }
    }
}

impl Drop for ConsumerExecutor {
    fn drop(&mut self) {
        self.terminate();
    }
}
