//! Node-to-manager RPC surface for executor attachments.

pub mod http;

pub use http::HttpDispatcherClient;

use crate::{
    CreateExecutorAttachmentRequest, CreateExecutorAttachmentResponse,
    ListExecutorAttachmentsRequest, ListExecutorAttachmentsResponse,
    RemoveExecutorAttachmentRequest, RemoveExecutorAttachmentResponse, Result,
};
use async_trait::async_trait;

pub const EXECUTOR_ATTACHMENTS_PATH: &str = "/internal/v1/executor-attachments";

/// Calls served by the manager-side attachment controller.
#[async_trait]
pub trait DispatcherClient: Send + Sync {
    /// - `InvalidArgument` if the spec is malformed.
    /// - `NotFound` if the target network does not exist.
    async fn create_executor_attachment(
        &self,
        request: CreateExecutorAttachmentRequest,
    ) -> Result<CreateExecutorAttachmentResponse>;

    /// - `InvalidArgument` if the ID is empty.
    /// - `NotFound` if no attachment has the ID.
    async fn remove_executor_attachment(
        &self,
        request: RemoveExecutorAttachmentRequest,
    ) -> Result<RemoveExecutorAttachmentResponse>;

    async fn list_executor_attachments(
        &self,
        request: ListExecutorAttachmentsRequest,
    ) -> Result<ListExecutorAttachmentsResponse>;
}
