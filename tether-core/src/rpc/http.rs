use super::{DispatcherClient, EXECUTOR_ATTACHMENTS_PATH};
use crate::{
    CreateExecutorAttachmentRequest, CreateExecutorAttachmentResponse,
    ListExecutorAttachmentsRequest, ListExecutorAttachmentsResponse,
    RemoveExecutorAttachmentRequest, RemoveExecutorAttachmentResponse, Result, RpcStatus,
    TetherError,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// JSON-over-HTTP client for a manager's attachment endpoints.
#[derive(Clone)]
pub struct HttpDispatcherClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDispatcherClient {
    /// `manager_addr` is either `host:port` or a full `http(s)://` URL.
    /// `timeout` bounds every call end to end.
    pub fn new(manager_addr: &str, timeout: Duration) -> Result<Self> {
        let manager_addr = manager_addr.trim().trim_end_matches('/');
        if manager_addr.is_empty() {
            return Err(TetherError::Config(
                "manager address cannot be empty".to_string(),
            ));
        }

        let base_url = if manager_addr.starts_with("http://") || manager_addr.starts_with("https://")
        {
            manager_addr.to_string()
        } else {
            format!("http://{}", manager_addr)
        };

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base_url })
    }

    fn attachments_url(&self) -> String {
        format!("{}{}", self.base_url, EXECUTOR_ATTACHMENTS_PATH)
    }
}

async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await?;
    match serde_json::from_str::<RpcStatus>(&body) {
        Ok(rpc_status) => Err(TetherError::from_status(rpc_status)),
        Err(_) => Err(TetherError::Internal(format!(
            "unexpected response status={} body={}",
            status, body
        ))),
    }
}

#[async_trait]
impl DispatcherClient for HttpDispatcherClient {
    async fn create_executor_attachment(
        &self,
        request: CreateExecutorAttachmentRequest,
    ) -> Result<CreateExecutorAttachmentResponse> {
        let response = self
            .client
            .post(self.attachments_url())
            .json(&request)
            .send()
            .await?;

        decode_response(response).await
    }

    async fn remove_executor_attachment(
        &self,
        request: RemoveExecutorAttachmentRequest,
    ) -> Result<RemoveExecutorAttachmentResponse> {
        // An empty ID would address the collection route instead.
        if request.id.is_empty() {
            return Err(TetherError::InvalidArgument(
                "attachment id must be provided".to_string(),
            ));
        }

        let mut url = reqwest::Url::parse(&self.attachments_url()).map_err(|error| {
            TetherError::Config(format!("invalid manager url {}: {}", self.base_url, error))
        })?;
        url.path_segments_mut()
            .map_err(|_| TetherError::Config(format!("invalid manager url {}", self.base_url)))?
            .push(&request.id);

        let response = self.client.delete(url).send().await?;

        decode_response(response).await
    }

    async fn list_executor_attachments(
        &self,
        request: ListExecutorAttachmentsRequest,
    ) -> Result<ListExecutorAttachmentsResponse> {
        let mut builder = self.client.get(self.attachments_url());
        if let Some(node_id) = request.node_id.as_deref() {
            builder = builder.query(&[("node_id", node_id)]);
        }

        let response = builder.send().await?;
        decode_response(response).await
    }
}
