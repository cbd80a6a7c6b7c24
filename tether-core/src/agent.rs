use crate::notifier::{Listener, Notifier};
use crate::rpc::DispatcherClient;
use crate::{
    CreateExecutorAttachmentRequest, CreateExecutorAttachmentResponse, ExecutorAttachment,
    ListExecutorAttachmentsRequest, RemoveExecutorAttachmentRequest,
    RemoveExecutorAttachmentResponse, Result, TetherError,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Control over executor attachments on this node.
#[async_trait]
pub trait ExecutorAttachmentManager: Send + Sync {
    /// Request the resources needed for a container attachment on this node.
    async fn create_attachment(
        &self,
        request: CreateExecutorAttachmentRequest,
    ) -> Result<CreateExecutorAttachmentResponse>;

    /// Release the resources associated with a container attachment.
    async fn remove_attachment(
        &self,
        request: RemoveExecutorAttachmentRequest,
    ) -> Result<RemoveExecutorAttachmentResponse>;

    /// Subscribe to executor attachment notifications.
    fn register(&self, listener: Option<Arc<dyn Listener>>) -> Result<String>;

    /// Leave the notification pool.
    fn leave(&self, registration_id: &str);
}

/// Node-local attachment client. Holds no attachment state: calls go to the
/// manager and notifications go through the node's [`Notifier`].
pub struct Agent {
    node_id: String,
    dispatcher: Arc<dyn DispatcherClient>,
    notifier: Arc<Notifier>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    pub fn new(
        node_id: impl Into<String>,
        dispatcher: Arc<dyn DispatcherClient>,
        notifier: Arc<Notifier>,
    ) -> Result<Self> {
        let node_id = node_id.into();
        if node_id.trim().is_empty() {
            return Err(TetherError::InvalidArgument(
                "agent node_id cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            node_id,
            dispatcher,
            notifier,
            sync_task: Mutex::new(None),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Poll the manager for this node's attachments every `interval` and
    /// notify listeners with the full set whenever it changes. Listeners
    /// that missed the current set, or registered after it went out, get it
    /// on a later tick. Replaces a previously started loop.
    pub fn start_sync(&self, interval: Duration) {
        let node_id = self.node_id.clone();
        let dispatcher = self.dispatcher.clone();
        let notifier = self.notifier.clone();

        let task = tokio::spawn(async move {
            sync_loop(node_id, dispatcher, notifier, interval).await;
        });

        let previous = self
            .sync_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop syncing and release every listener.
    pub async fn shutdown(&self) {
        let task = self
            .sync_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }

        self.notifier.shutdown().await;
        tracing::info!("Agent for node {} shut down", self.node_id);
    }
}

#[async_trait]
impl ExecutorAttachmentManager for Agent {
    async fn create_attachment(
        &self,
        request: CreateExecutorAttachmentRequest,
    ) -> Result<CreateExecutorAttachmentResponse> {
        self.dispatcher.create_executor_attachment(request).await
    }

    async fn remove_attachment(
        &self,
        request: RemoveExecutorAttachmentRequest,
    ) -> Result<RemoveExecutorAttachmentResponse> {
        self.dispatcher.remove_executor_attachment(request).await
    }

    fn register(&self, listener: Option<Arc<dyn Listener>>) -> Result<String> {
        self.notifier.register(listener)
    }

    fn leave(&self, registration_id: &str) {
        self.notifier.leave(registration_id)
    }
}

async fn sync_loop(
    node_id: String,
    dispatcher: Arc<dyn DispatcherClient>,
    notifier: Arc<Notifier>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut current: Option<Vec<ExecutorAttachment>> = None;
    let mut delivered: HashSet<String> = HashSet::new();

    loop {
        ticker.tick().await;

        let request = ListExecutorAttachmentsRequest {
            node_id: Some(node_id.clone()),
        };
        let attachments = match dispatcher.list_executor_attachments(request).await {
            Ok(response) => response.attachments,
            Err(error) => {
                tracing::warn!("Attachment sync for node {} failed: {}", node_id, error);
                continue;
            }
        };

        if current.as_ref() == Some(&attachments) {
            let resent = notifier.notify_missing(attachments, &delivered);
            if !resent.is_empty() {
                tracing::debug!(
                    "Resent attachment set for node {} to {} listeners",
                    node_id,
                    resent.len()
                );
                delivered.extend(resent);
            }
            continue;
        }

        tracing::debug!(
            "Attachment set for node {} changed, {} attachments",
            node_id,
            attachments.len()
        );
        delivered = notifier.notify(attachments.clone());
        current = Some(attachments);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::AttachmentBatch;
    use crate::{AttachmentSpec, ClusterStore, Dispatcher, Network, TetherError};
    use tokio::sync::{Semaphore, mpsc};

    struct ChannelListener {
        seen: mpsc::UnboundedSender<Vec<String>>,
    }

    #[async_trait]
    impl Listener for ChannelListener {
        async fn notify(&self, attachments: AttachmentBatch) {
            let _ = self
                .seen
                .send(attachments.iter().map(|att| att.id.clone()).collect());
        }
    }

    fn seeded_store() -> ClusterStore {
        let store = ClusterStore::open_in_memory().unwrap();
        store
            .update(|tx| tx.put_network(&Network::new("net1", Some("prod-net".to_string()))))
            .unwrap();
        store
    }

    fn agent(node_id: &str) -> Agent {
        agent_with_notifier(node_id, seeded_store(), Notifier::default())
    }

    fn agent_with_notifier(node_id: &str, store: ClusterStore, notifier: Notifier) -> Agent {
        let dispatcher: Arc<dyn DispatcherClient> = Arc::new(Dispatcher::new(Arc::new(store)));
        Agent::new(node_id, dispatcher, Arc::new(notifier)).unwrap()
    }

    fn create_request(node_id: &str, target: &str) -> CreateExecutorAttachmentRequest {
        CreateExecutorAttachmentRequest {
            spec: AttachmentSpec {
                node_id: node_id.to_string(),
                target: target.to_string(),
                ..Default::default()
            },
        }
    }

    async fn next(receiver: &mut mpsc::UnboundedReceiver<Vec<String>>) -> Vec<String> {
        tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_remove_pass_through() {
        let agent = agent("node-1");

        let created = agent
            .create_attachment(create_request("node-1", "prod-net"))
            .await
            .unwrap();
        assert!(!created.id.is_empty());

        agent
            .remove_attachment(RemoveExecutorAttachmentRequest {
                id: created.id.clone(),
            })
            .await
            .unwrap();

        let error = agent
            .remove_attachment(RemoveExecutorAttachmentRequest { id: created.id })
            .await
            .unwrap_err();
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn test_create_propagates_controller_errors() {
        let agent = agent("node-1");
        let error = agent
            .create_attachment(create_request("node-1", "missing-net"))
            .await
            .unwrap_err();
        assert!(matches!(error, TetherError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_register_and_leave_delegate_to_notifier() {
        let agent = agent("node-1");
        let (seen, _rx) = mpsc::unbounded_channel();
        let registration_id = agent
            .register(Some(Arc::new(ChannelListener { seen })))
            .unwrap();
        assert_eq!(agent.notifier().len(), 1);

        agent.leave(&registration_id);
        assert!(agent.notifier().is_empty());
        assert!(agent.register(None).is_err());
    }

    #[tokio::test]
    async fn test_sync_notifies_on_change() {
        let agent = agent("node-1");
        let (seen, mut rx) = mpsc::unbounded_channel();
        agent
            .register(Some(Arc::new(ChannelListener { seen })))
            .unwrap();

        agent.start_sync(Duration::from_millis(10));
        assert!(next(&mut rx).await.is_empty());

        let created = agent
            .create_attachment(create_request("node-1", "net1"))
            .await
            .unwrap();
        // Attachments of other nodes are not delivered here.
        agent
            .create_attachment(create_request("node-2", "net1"))
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await, vec![created.id.clone()]);

        agent
            .remove_attachment(RemoveExecutorAttachmentRequest { id: created.id })
            .await
            .unwrap();
        assert!(next(&mut rx).await.is_empty());

        agent.shutdown().await;
        assert!(agent.notifier().is_empty());
    }

    #[test]
    fn test_new_rejects_empty_node_id() {
        let dispatcher: Arc<dyn DispatcherClient> =
            Arc::new(Dispatcher::new(Arc::new(seeded_store())));
        for node_id in ["", "   "] {
            let error = Agent::new(node_id, dispatcher.clone(), Arc::new(Notifier::default()))
                .err()
                .unwrap();
            assert!(matches!(error, TetherError::InvalidArgument(_)));
        }
    }

    /// Records every batch size, then waits for a permit before returning.
    struct GatedListener {
        seen: mpsc::UnboundedSender<usize>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl Listener for GatedListener {
        async fn notify(&self, attachments: AttachmentBatch) {
            let _ = self.seen.send(attachments.len());
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
    }

    #[tokio::test]
    async fn test_sync_resends_set_dropped_by_full_queue() {
        let agent = agent_with_notifier("node-1", seeded_store(), Notifier::new(1));
        let (seen, mut rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let listener: Arc<dyn Listener> = Arc::new(GatedListener {
            seen,
            gate: gate.clone(),
        });
        agent.register(Some(listener)).unwrap();

        agent.start_sync(Duration::from_millis(10));
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(0));

        // The listener is stuck on the empty set: the one-attachment set fills
        // its queue and the two-attachment set is dropped.
        agent
            .create_attachment(create_request("node-1", "net1"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        agent
            .create_attachment(create_request("node-1", "net1"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        gate.add_permits(100);
        let mut last_seen = None;
        while last_seen != Some(2) {
            last_seen = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap();
        }

        agent.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_delivers_current_set_to_late_listener() {
        let agent = agent("node-1");
        let created = agent
            .create_attachment(create_request("node-1", "net1"))
            .await
            .unwrap();

        let (early, mut early_rx) = mpsc::unbounded_channel();
        agent
            .register(Some(Arc::new(ChannelListener { seen: early })))
            .unwrap();
        agent.start_sync(Duration::from_millis(10));
        assert_eq!(next(&mut early_rx).await, vec![created.id.clone()]);

        let (late, mut late_rx) = mpsc::unbounded_channel();
        agent
            .register(Some(Arc::new(ChannelListener { seen: late })))
            .unwrap();
        assert_eq!(next(&mut late_rx).await, vec![created.id]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(early_rx.try_recv().is_err());

        agent.shutdown().await;
    }

    struct StuckListener;

    #[async_trait]
    impl Listener for StuckListener {
        async fn notify(&self, _attachments: AttachmentBatch) {
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn test_shutdown_returns_with_stuck_listener() {
        let agent = agent_with_notifier(
            "node-1",
            seeded_store(),
            Notifier::default().with_shutdown_grace(Duration::from_millis(50)),
        );
        let listener: Arc<dyn Listener> = Arc::new(StuckListener);
        agent.register(Some(listener)).unwrap();
        agent.notifier().notify(Vec::new());

        tokio::time::timeout(Duration::from_secs(2), agent.shutdown())
            .await
            .unwrap();
        assert!(agent.notifier().is_empty());
    }
}
