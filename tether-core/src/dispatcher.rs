use crate::operations::{
    CreateAttachmentOperation, CreateAttachmentOperationRequest, ListAttachmentsOperation,
    ListAttachmentsOperationRequest, RemoveAttachmentOperation, RemoveAttachmentOperationRequest,
};
use crate::rpc::DispatcherClient;
use crate::{
    ClusterStore, CreateExecutorAttachmentRequest, CreateExecutorAttachmentResponse,
    ListExecutorAttachmentsRequest, ListExecutorAttachmentsResponse,
    RemoveExecutorAttachmentRequest, RemoveExecutorAttachmentResponse, Result,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Manager-side attachment controller.
///
/// Each call runs independently; conflicting writes are serialized by the
/// store. Nothing is cached here, so every answer reflects committed state.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<ClusterStore>,
    create_operation: CreateAttachmentOperation,
    remove_operation: RemoveAttachmentOperation,
    list_operation: ListAttachmentsOperation,
}

impl Dispatcher {
    pub fn new(store: Arc<ClusterStore>) -> Self {
        Self {
            create_operation: CreateAttachmentOperation::new(store.clone()),
            remove_operation: RemoveAttachmentOperation::new(store.clone()),
            list_operation: ListAttachmentsOperation::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<ClusterStore> {
        &self.store
    }
}

#[async_trait]
impl DispatcherClient for Dispatcher {
    async fn create_executor_attachment(
        &self,
        request: CreateExecutorAttachmentRequest,
    ) -> Result<CreateExecutorAttachmentResponse> {
        let result = self
            .create_operation
            .run(CreateAttachmentOperationRequest { spec: request.spec })
            .await?;

        Ok(CreateExecutorAttachmentResponse { id: result.id })
    }

    async fn remove_executor_attachment(
        &self,
        request: RemoveExecutorAttachmentRequest,
    ) -> Result<RemoveExecutorAttachmentResponse> {
        self.remove_operation
            .run(RemoveAttachmentOperationRequest { id: request.id })
            .await?;

        Ok(RemoveExecutorAttachmentResponse {})
    }

    async fn list_executor_attachments(
        &self,
        request: ListExecutorAttachmentsRequest,
    ) -> Result<ListExecutorAttachmentsResponse> {
        let result = self
            .list_operation
            .run(ListAttachmentsOperationRequest {
                node_id: request.node_id,
            })
            .await?;

        Ok(ListExecutorAttachmentsResponse {
            attachments: result.attachments,
        })
    }
}
