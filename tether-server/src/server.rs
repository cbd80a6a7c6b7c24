use crate::config::ManagerConfig;
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use serde::Deserialize;
use std::sync::Arc;
use tether_core::{
    ClusterStore, CreateExecutorAttachmentRequest, Dispatcher, DispatcherClient,
    EXECUTOR_ATTACHMENTS_PATH, ListExecutorAttachmentsRequest, RemoveExecutorAttachmentRequest,
    Result, RpcCode, TetherError,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub struct ServerState {
    pub dispatcher: Dispatcher,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    node_id: Option<String>,
}

pub async fn run_server(config: ManagerConfig) -> Result<()> {
    let store = match config.db_path.as_ref() {
        Some(path) => ClusterStore::open(path)?,
        None => {
            tracing::warn!("No db_path configured; cluster state is kept in memory");
            ClusterStore::open_in_memory()?
        }
    };

    let networks: Vec<_> = config.networks.iter().map(|n| n.to_network()).collect();
    store.update(|tx| {
        for network in &networks {
            tx.put_network(network)?;
        }
        Ok(())
    })?;
    tracing::info!("Seeded {} networks", networks.len());

    let state = Arc::new(ServerState {
        dispatcher: Dispatcher::new(Arc::new(store)),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Manager listening on {}", config.bind_addr);

    axum::serve(listener, router(state)).await?;

    Ok(())
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            EXECUTOR_ATTACHMENTS_PATH,
            get(list_attachments).post(create_attachment),
        )
        .route(
            &format!("{}/", EXECUTOR_ATTACHMENTS_PATH),
            delete(remove_attachment_without_id),
        )
        .route(
            &format!("{}/:id", EXECUTOR_ATTACHMENTS_PATH),
            delete(remove_attachment),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

fn error_response(error: TetherError) -> Response {
    let status = match error.code() {
        RpcCode::InvalidArgument => StatusCode::BAD_REQUEST,
        RpcCode::NotFound => StatusCode::NOT_FOUND,
        RpcCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        RpcCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::warn!("Attachment request failed: {}", error);
    }

    (status, Json(error.to_status())).into_response()
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn create_attachment(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<CreateExecutorAttachmentRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(TetherError::InvalidArgument(rejection.body_text()));
        }
    };

    match state.dispatcher.create_executor_attachment(request).await {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn remove_attachment(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state
        .dispatcher
        .remove_executor_attachment(RemoveExecutorAttachmentRequest { id })
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn remove_attachment_without_id(
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    remove_attachment(State(state), Path(String::new())).await
}

async fn list_attachments(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    match state
        .dispatcher
        .list_executor_attachments(ListExecutorAttachmentsRequest {
            node_id: query.node_id,
        })
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => error_response(error),
    }
}
