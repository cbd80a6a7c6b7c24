use crate::{ClusterStore, Result, StoreError, TetherError};
use std::sync::Arc;

#[derive(Clone)]
pub struct RemoveAttachmentOperation {
    store: Arc<ClusterStore>,
}

#[derive(Debug, Clone)]
pub struct RemoveAttachmentOperationRequest {
    pub id: String,
}

impl RemoveAttachmentOperation {
    pub fn new(store: Arc<ClusterStore>) -> Self {
        Self { store }
    }

    /// Delete the attachment record. Removing an ID that is already gone
    /// always fails with `NotFound`.
    pub async fn run(&self, request: RemoveAttachmentOperationRequest) -> Result<()> {
        let RemoveAttachmentOperationRequest { id } = request;

        if id.is_empty() {
            return Err(TetherError::InvalidArgument(
                "attachment id must be provided".to_string(),
            ));
        }

        match self.store.update(|tx| tx.delete_attachment(&id)) {
            Ok(()) => {}
            Err(StoreError::NotExist) => {
                return Err(TetherError::NotFound(format!("attachment {} not found", id)));
            }
            Err(error) => return Err(error.into()),
        }

        tracing::info!("Attachment {} removed from store", id);
        Ok(())
    }
}
