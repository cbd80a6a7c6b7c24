//! Node-local fan-out of executor attachment changes.
//!
//! Every registered [`Listener`] owns a bounded queue drained by its own
//! delivery task, so a slow listener only delays itself.

use crate::{ExecutorAttachment, Result, TetherError};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use ulid::Ulid;

pub const DEFAULT_LISTENER_QUEUE_DEPTH: usize = 64;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

pub type AttachmentBatch = Arc<[ExecutorAttachment]>;

/// Receives batches of executor attachment updates.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn notify(&self, attachments: AttachmentBatch);
}

struct ListenerEntry {
    sender: mpsc::Sender<AttachmentBatch>,
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ListenerEntry {
    fn deactivate(self) -> JoinHandle<()> {
        self.active.store(false, Ordering::Release);
        self.task
    }
}

#[derive(Default)]
struct Registry {
    listeners: HashMap<String, ListenerEntry>,
    closed: bool,
}

pub struct Notifier {
    registry: RwLock<Registry>,
    queue_depth: usize,
    shutdown_grace: Duration,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_LISTENER_QUEUE_DEPTH)
    }
}

impl Notifier {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            queue_depth: queue_depth.max(1),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// How long `shutdown` waits for in-flight callbacks before aborting
    /// their delivery tasks.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Register a listener and return its registration ID.
    ///
    /// Must be called from within a Tokio runtime: the listener's delivery
    /// task is spawned here.
    pub fn register(&self, listener: Option<Arc<dyn Listener>>) -> Result<String> {
        let listener = listener
            .ok_or_else(|| TetherError::InvalidArgument("invalid listener".to_string()))?;

        let mut registry = self.write_registry();
        if registry.closed {
            return Err(TetherError::Unavailable(
                "notifier has been shut down".to_string(),
            ));
        }

        let mut registration_id = Ulid::new().to_string();
        while registry.listeners.contains_key(&registration_id) {
            registration_id = Ulid::new().to_string();
        }

        let (sender, receiver) = mpsc::channel(self.queue_depth);
        let active = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(deliver(
            registration_id.clone(),
            listener,
            receiver,
            active.clone(),
        ));

        registry.listeners.insert(
            registration_id.clone(),
            ListenerEntry {
                sender,
                active,
                task,
            },
        );

        tracing::debug!("Notifier: registered listener {}", registration_id);
        Ok(registration_id)
    }

    /// Remove a listener. Batches still queued for it are discarded.
    /// Unknown IDs are ignored.
    pub fn leave(&self, registration_id: &str) {
        let entry = self.write_registry().listeners.remove(registration_id);
        match entry {
            Some(entry) => {
                drop(entry.deactivate());
                tracing::debug!("Notifier: listener {} left", registration_id);
            }
            None => {
                tracing::debug!(
                    "Notifier: leave for unknown listener {} ignored",
                    registration_id
                );
            }
        }
    }

    /// Queue `attachments` for every registered listener without waiting on
    /// any of them. A listener whose queue is full misses this batch.
    ///
    /// Returns the registration IDs the batch was queued for.
    pub fn notify(&self, attachments: Vec<ExecutorAttachment>) -> HashSet<String> {
        let batch: AttachmentBatch = attachments.into();
        for attachment in batch.iter() {
            tracing::debug!(
                "Notifier: {} ({}) ({}): {:?}",
                attachment.id,
                attachment.spec.annotations.name,
                attachment.status.state,
                attachment.attachment.addresses
            );
        }

        self.fan_out(&batch, None)
    }

    /// Queue `attachments` only for listeners not in `delivered`, such as
    /// listeners that missed an earlier copy of the same batch or registered
    /// after it went out. Returns the IDs it was queued for.
    pub fn notify_missing(
        &self,
        attachments: Vec<ExecutorAttachment>,
        delivered: &HashSet<String>,
    ) -> HashSet<String> {
        self.fan_out(&attachments.into(), Some(delivered))
    }

    fn fan_out(
        &self,
        batch: &AttachmentBatch,
        skip: Option<&HashSet<String>>,
    ) -> HashSet<String> {
        let mut queued = HashSet::new();
        let registry = self.read_registry();
        for (registration_id, entry) in registry.listeners.iter() {
            if skip.is_some_and(|skip| skip.contains(registration_id)) {
                continue;
            }

            tracing::debug!("Notifier: notifying listener {}", registration_id);
            match entry.sender.try_send(batch.clone()) {
                Ok(()) => {
                    queued.insert(registration_id.clone());
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        "Notifier: queue full for listener {}, dropped batch of {} attachments",
                        registration_id,
                        batch.len()
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!(
                        "Notifier: delivery task for listener {} is gone",
                        registration_id
                    );
                }
            }
        }

        queued
    }

    pub fn len(&self) -> usize {
        self.read_registry().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every listener and refuse new registrations. Callbacks still
    /// running after the shutdown grace period are aborted.
    pub async fn shutdown(&self) {
        let mut tasks = {
            let mut registry = self.write_registry();
            registry.closed = true;
            let tasks: Vec<JoinHandle<()>> = registry
                .listeners
                .drain()
                .map(|(_, entry)| entry.deactivate())
                .collect();
            tasks
        };

        let count = tasks.len();
        match tokio::time::timeout(self.shutdown_grace, join_all(tasks.iter_mut())).await {
            Ok(results) => {
                for error in results.into_iter().filter_map(|result| result.err()) {
                    tracing::warn!("Notifier: delivery task ended abnormally: {}", error);
                }
            }
            Err(_) => {
                let stuck = tasks.iter().filter(|task| !task.is_finished()).count();
                tracing::warn!(
                    "Notifier: aborting {} listener callbacks still running after {:?}",
                    stuck,
                    self.shutdown_grace
                );
                for task in &tasks {
                    task.abort();
                }
            }
        }

        tracing::debug!("Notifier: shut down {} listeners", count);
    }

    // The registry map stays consistent even if a holder panicked.
    fn read_registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn deliver(
    registration_id: String,
    listener: Arc<dyn Listener>,
    mut receiver: mpsc::Receiver<AttachmentBatch>,
    active: Arc<AtomicBool>,
) {
    while let Some(batch) = receiver.recv().await {
        if !active.load(Ordering::Acquire) {
            break;
        }
        listener.notify(batch).await;
    }

    tracing::debug!("Notifier: delivery for listener {} stopped", registration_id);
}
