//! Correlated pack tracking
//!
//! A pack is the batch of notifications returned by one poll. Every message
//! gets a fresh correlation ID and starts out pending; its callback moves it
//! to succeeded or failed exactly once. The pack's barrier releases as soon
//! as nothing is pending any more.
//!
//! All three maps live behind one mutex inside a state object that is created
//! per poll cycle. Late callbacks, fired after the loop stopped waiting, write
//! into that object only, so they can never reach the next pack.

use crate::error::ProcessingError;
use crate::msg::QueueMsg;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::trace;
use uuid::Uuid;

/// A message that failed, with the reported cause
#[derive(Debug)]
pub struct FailedEntry<T> {
    pub msg: Arc<QueueMsg<T>>,
    pub cause: ProcessingError,
}

impl<T> Clone for FailedEntry<T> {
    fn clone(&self) -> Self {
        Self {
            msg: Arc::clone(&self.msg),
            cause: self.cause.clone(),
        }
    }
}

struct PackMaps<T> {
    pending: HashMap<Uuid, Arc<QueueMsg<T>>>,
    succeeded: HashMap<Uuid, Arc<QueueMsg<T>>>,
    failed: HashMap<Uuid, FailedEntry<T>>,
}

struct PackState<T> {
    maps: Mutex<PackMaps<T>>,
    done: watch::Sender<bool>,
}

impl<T> PackState<T> {
    fn maps(&self) -> MutexGuard<'_, PackMaps<T>> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiver of per-message outcomes, type-erased so callbacks are independent
/// of the payload type.
trait OutcomeSink: Send + Sync {
    fn record(&self, id: Uuid, outcome: Result<(), ProcessingError>);
}

impl<T: Send + Sync + 'static> OutcomeSink for PackState<T> {
    fn record(&self, id: Uuid, outcome: Result<(), ProcessingError>) {
        let mut maps = self.maps();

        let Some(msg) = maps.pending.remove(&id) else {
            trace!(
                correlation_id = %id,
                "Ignoring callback for a message that already has an outcome"
            );
            return;
        };

        match outcome {
            Ok(()) => {
                maps.succeeded.insert(id, msg);
            }
            Err(cause) => {
                maps.failed.insert(id, FailedEntry { msg, cause });
            }
        }

        if maps.pending.is_empty() {
            self.done.send_replace(true);
        }
    }
}

/// Completion handle for one message of one pack.
///
/// Cloning is cheap. Only the first invocation across all clones has an
/// effect; later ones are ignored.
#[derive(Clone)]
pub struct PackCallback {
    id: Uuid,
    sink: Arc<dyn OutcomeSink>,
}

impl PackCallback {
    /// Correlation ID this callback is bound to
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Mark the message as processed
    pub fn on_success(&self) {
        self.sink.record(self.id, Ok(()));
    }

    /// Mark the message as failed
    pub fn on_failure(&self, cause: impl Into<ProcessingError>) {
        self.sink.record(self.id, Err(cause.into()));
    }
}

impl fmt::Debug for PackCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackCallback").field("id", &self.id).finish()
    }
}

/// Point-in-time view of a pack, in poll order
#[derive(Debug, Clone)]
pub struct PackSnapshot<T> {
    pub pending: Vec<(Uuid, Arc<QueueMsg<T>>)>,
    pub succeeded: Vec<(Uuid, Arc<QueueMsg<T>>)>,
    pub failed: Vec<(Uuid, FailedEntry<T>)>,
}

impl<T> PackSnapshot<T> {
    /// Total number of messages in the pack
    pub fn len(&self) -> usize {
        self.pending.len() + self.succeeded.len() + self.failed.len()
    }

    /// Whether the pack had no messages
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_ids(&self) -> Vec<Uuid> {
        self.pending.iter().map(|(id, _)| *id).collect()
    }

    pub fn succeeded_ids(&self) -> Vec<Uuid> {
        self.succeeded.iter().map(|(id, _)| *id).collect()
    }

    pub fn failed_ids(&self) -> Vec<Uuid> {
        self.failed.iter().map(|(id, _)| *id).collect()
    }
}

/// Tracks the outcome of every message in one pack.
pub struct PackTracker<T> {
    entries: Vec<(Uuid, Arc<QueueMsg<T>>)>,
    state: Arc<PackState<T>>,
}

impl<T: Send + Sync + 'static> PackTracker<T> {
    /// Assign a correlation ID to every message and mark all of them pending
    pub fn new(msgs: Vec<QueueMsg<T>>) -> Self {
        let entries: Vec<(Uuid, Arc<QueueMsg<T>>)> = msgs
            .into_iter()
            .map(|msg| (Uuid::new_v4(), Arc::new(msg)))
            .collect();

        let pending = entries
            .iter()
            .map(|(id, msg)| (*id, Arc::clone(msg)))
            .collect::<HashMap<_, _>>();
        let (done, _) = watch::channel(pending.is_empty());

        Self {
            entries,
            state: Arc::new(PackState {
                maps: Mutex::new(PackMaps {
                    pending,
                    succeeded: HashMap::new(),
                    failed: HashMap::new(),
                }),
                done,
            }),
        }
    }

    /// Messages of the pack with their correlation IDs, in poll order
    pub fn entries(&self) -> &[(Uuid, Arc<QueueMsg<T>>)] {
        &self.entries
    }

    /// Callback bound to `id` and this pack
    pub fn callback(&self, id: Uuid) -> PackCallback {
        PackCallback {
            id,
            sink: self.state.clone(),
        }
    }

    /// Number of messages in the pack
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of messages still waiting for an outcome
    pub fn pending_count(&self) -> usize {
        self.state.maps().pending.len()
    }

    /// Whether every message has an outcome
    pub fn is_done(&self) -> bool {
        *self.state.done.borrow()
    }

    /// Wait until every message has an outcome or `timeout` elapses.
    ///
    /// Returns `true` if the pack completed in time.
    pub async fn await_completion(&self, timeout: Duration) -> bool {
        let mut done = self.state.done.subscribe();
        matches!(
            tokio::time::timeout(timeout, done.wait_for(|done| *done)).await,
            Ok(Ok(_))
        )
    }

    /// Copy the current partition of the pack
    pub fn snapshot(&self) -> PackSnapshot<T> {
        let maps = self.state.maps();
        let mut snapshot = PackSnapshot {
            pending: Vec::new(),
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        for (id, msg) in &self.entries {
            if maps.pending.contains_key(id) {
                snapshot.pending.push((*id, Arc::clone(msg)));
            } else if maps.succeeded.contains_key(id) {
                snapshot.succeeded.push((*id, Arc::clone(msg)));
            } else if let Some(failed) = maps.failed.get(id) {
                snapshot.failed.push((*id, failed.clone()));
            }
        }

        snapshot
    }
}

impl<T> fmt::Debug for PackTracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackTracker")
            .field("size", &self.entries.len())
            .finish()
    }
}
