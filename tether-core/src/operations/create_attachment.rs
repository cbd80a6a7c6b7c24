use crate::operations::resolve_network;
use crate::{
    AttachmentSpec, AttachmentState, AttachmentStatus, ClusterStore, ExecutorAttachment,
    NetworkAttachment, Result, TetherError,
};
use chrono::Utc;
use std::sync::Arc;
use ulid::Ulid;

#[derive(Clone)]
pub struct CreateAttachmentOperation {
    store: Arc<ClusterStore>,
}

#[derive(Debug, Clone)]
pub struct CreateAttachmentOperationRequest {
    pub spec: AttachmentSpec,
}

#[derive(Debug, Clone)]
pub struct CreateAttachmentOperationResult {
    pub id: String,
}

impl CreateAttachmentOperation {
    pub fn new(store: Arc<ClusterStore>) -> Self {
        Self { store }
    }

    pub async fn run(
        &self,
        request: CreateAttachmentOperationRequest,
    ) -> Result<CreateAttachmentOperationResult> {
        let CreateAttachmentOperationRequest { spec } = request;
        validate_spec(&spec)?;

        let id = Ulid::new().to_string();

        let network = self
            .store
            .view(|tx| resolve_network(tx, &spec.target))?
            .ok_or_else(|| TetherError::NotFound(format!("network {} not found", spec.target)))?;

        let attachment = ExecutorAttachment {
            id: id.clone(),
            node_id: spec.node_id.clone(),
            attachment: NetworkAttachment {
                network,
                addresses: spec.addresses.clone(),
            },
            spec,
            status: AttachmentStatus {
                state: AttachmentState::New,
                message: String::new(),
                timestamp: Utc::now(),
            },
        };

        // The network may have been removed since the view closed.
        let persisted = self.store.update(|tx| {
            if tx.get_network(&attachment.attachment.network.id)?.is_none() {
                return Ok(false);
            }
            tx.create_attachment(&attachment)?;
            Ok(true)
        })?;

        if !persisted {
            return Err(TetherError::NotFound(format!(
                "network {} not found",
                attachment.spec.target
            )));
        }

        tracing::info!(
            "Attachment {} created for node {} on network {}",
            id,
            attachment.node_id,
            attachment.attachment.network.id
        );

        Ok(CreateAttachmentOperationResult { id })
    }
}

fn validate_spec(spec: &AttachmentSpec) -> Result<()> {
    if spec.node_id.trim().is_empty() {
        return Err(TetherError::InvalidArgument(
            "attachment spec node_id cannot be empty".to_string(),
        ));
    }

    if spec.target.trim().is_empty() {
        return Err(TetherError::InvalidArgument(
            "attachment spec target cannot be empty".to_string(),
        ));
    }

    Ok(())
}
