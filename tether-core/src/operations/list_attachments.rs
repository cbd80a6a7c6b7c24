use crate::{AttachmentFilter, ClusterStore, ExecutorAttachment, Result, TetherError};
use std::sync::Arc;

#[derive(Clone)]
pub struct ListAttachmentsOperation {
    store: Arc<ClusterStore>,
}

#[derive(Debug, Clone, Default)]
pub struct ListAttachmentsOperationRequest {
    pub node_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListAttachmentsOperationResult {
    pub attachments: Vec<ExecutorAttachment>,
}

impl ListAttachmentsOperation {
    pub fn new(store: Arc<ClusterStore>) -> Self {
        Self { store }
    }

    pub async fn run(
        &self,
        request: ListAttachmentsOperationRequest,
    ) -> Result<ListAttachmentsOperationResult> {
        // An empty node filter is a caller bug, not a request for every node.
        let filter = match request.node_id {
            Some(node_id) if node_id.trim().is_empty() => {
                return Err(TetherError::InvalidArgument(
                    "node_id filter cannot be empty".to_string(),
                ));
            }
            Some(node_id) => AttachmentFilter::ByNode(node_id),
            None => AttachmentFilter::All,
        };

        let attachments = self.store.view(|tx| tx.find_attachments(&filter))?;
        Ok(ListAttachmentsOperationResult { attachments })
    }
}
