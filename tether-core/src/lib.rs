//! Tether Core - executor attachment control path for cluster nodes
//!
//! - A manager-side [`Dispatcher`] resolves the target network and persists
//!   attachment records in a transactional [`ClusterStore`].
//! - A node-side [`Agent`] forwards create/remove calls to the manager and
//!   fans attachment changes out to local [`Listener`]s through its
//!   [`Notifier`].

pub mod agent;
pub mod dispatcher;
pub mod error;
pub mod notifier;
pub mod operations;
pub mod rpc;
pub mod storage;
pub mod types;

pub use agent::{Agent, ExecutorAttachmentManager};
pub use dispatcher::Dispatcher;
pub use error::{Result, RpcCode, RpcStatus, StoreError, TetherError};
pub use notifier::{
    AttachmentBatch, DEFAULT_LISTENER_QUEUE_DEPTH, DEFAULT_SHUTDOWN_GRACE, Listener, Notifier,
};
pub use operations::{NetworkLookup, resolve_network};
pub use rpc::{DispatcherClient, EXECUTOR_ATTACHMENTS_PATH, HttpDispatcherClient};
pub use storage::{AttachmentFilter, ClusterStore, NetworkFilter, ReadTx, WriteTx};
pub use types::{
    Annotations, AttachmentSpec, AttachmentState, AttachmentStatus,
    CreateExecutorAttachmentRequest, CreateExecutorAttachmentResponse, ExecutorAttachment,
    ListExecutorAttachmentsRequest, ListExecutorAttachmentsResponse, Network, NetworkAttachment,
    RemoveExecutorAttachmentRequest, RemoveExecutorAttachmentResponse,
};
