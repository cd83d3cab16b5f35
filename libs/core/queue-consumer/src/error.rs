//! Consumer error types
//!
//! Two families of errors flow through the consumer:
//! - **ConsumerError**: queue, runtime and lifecycle failures owned by the consumer itself
//! - **ProcessingError**: a notification handler failed to process one message
//!
//! Neither is ever retried by this crate. Handler failures are recorded in the
//! pack that owns the message, queue failures trigger the poll backoff.

use thiserror::Error;

/// Errors raised by the consumer core and its queue clients
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Poll, commit or subscription failure reported by the queue client
    #[error("Queue error: {0}")]
    Queue(String),

    /// Failed to build an execution context
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    /// `init` was not called before the consumer was started
    #[error("Consumer service is not initialized")]
    NotInitialized,

    /// The application-ready signal was delivered more than once
    #[error("Consumer service is already started")]
    AlreadyStarted,

    /// The consumer has been destroyed
    #[error("Consumer service is stopped")]
    Stopped,
}

impl ConsumerError {
    /// Create a queue error
    pub fn queue(message: impl Into<String>) -> Self {
        ConsumerError::Queue(message.into())
    }

    /// Lifecycle errors are caller mistakes, everything else comes from the environment
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            ConsumerError::NotInitialized | ConsumerError::AlreadyStarted | ConsumerError::Stopped
        )
    }
}

/// Failure of a notification handler for a single message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// The handler reported a failure
    #[error("Processing failed: {0}")]
    Failed(String),

    /// The handler panicked while the message was being dispatched
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// The handler refused the message before doing any work
    #[error("Message rejected: {0}")]
    Rejected(String),
}

impl ProcessingError {
    /// Create a generic processing failure
    pub fn failed(message: impl Into<String>) -> Self {
        ProcessingError::Failed(message.into())
    }

    /// Create a rejection
    pub fn rejected(message: impl Into<String>) -> Self {
        ProcessingError::Rejected(message.into())
    }

    /// Build an error from a caught panic payload
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        ProcessingError::Panicked(message)
    }
}

impl From<String> for ProcessingError {
    fn from(message: String) -> Self {
        ProcessingError::Failed(message)
    }
}

impl From<&str> for ProcessingError {
    fn from(message: &str) -> Self {
        ProcessingError::Failed(message.to_string())
    }
}
