use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TetherError>;

/// Failures raised by the cluster store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object does not exist")]
    NotExist,

    #[error("object already exists")]
    AlreadyExists,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum TetherError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire-level classification of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcCode {
    InvalidArgument,
    NotFound,
    Unavailable,
    Internal,
}

/// Error envelope carried in failed RPC responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: RpcCode,
    pub message: String,
}

impl TetherError {
    pub fn code(&self) -> RpcCode {
        match self {
            TetherError::InvalidArgument(_) => RpcCode::InvalidArgument,
            TetherError::NotFound(_) => RpcCode::NotFound,
            TetherError::Unavailable(_)
            | TetherError::Transport(_)
            | TetherError::Store(StoreError::Unavailable(_)) => RpcCode::Unavailable,
            TetherError::Internal(_)
            | TetherError::Store(_)
            | TetherError::Config(_)
            | TetherError::Io(_) => RpcCode::Internal,
        }
    }

    /// Builds the envelope sent back to a remote caller. Store failures keep
    /// their original message.
    pub fn to_status(&self) -> RpcStatus {
        let message = match self {
            TetherError::InvalidArgument(message)
            | TetherError::NotFound(message)
            | TetherError::Unavailable(message)
            | TetherError::Internal(message)
            | TetherError::Config(message) => message.clone(),
            TetherError::Store(error) => error.to_string(),
            TetherError::Transport(error) => error.to_string(),
            TetherError::Io(error) => error.to_string(),
        };

        RpcStatus {
            code: self.code(),
            message,
        }
    }

    pub fn from_status(status: RpcStatus) -> Self {
        match status.code {
            RpcCode::InvalidArgument => TetherError::InvalidArgument(status.message),
            RpcCode::NotFound => TetherError::NotFound(status.message),
            RpcCode::Unavailable => TetherError::Unavailable(status.message),
            RpcCode::Internal => TetherError::Internal(status.message),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == RpcCode::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_keep_message() {
        let error = TetherError::from(StoreError::AlreadyExists);
        let status = error.to_status();
        assert_eq!(status.code, RpcCode::Internal);
        assert_eq!(status.message, "object already exists");

        let error = TetherError::from(StoreError::Unavailable("lock poisoned".to_string()));
        assert_eq!(error.code(), RpcCode::Unavailable);
    }

    #[test]
    fn test_status_round_trip_preserves_kind() {
        let original = TetherError::NotFound("attachment att1 not found".to_string());
        let rebuilt = TetherError::from_status(original.to_status());
        assert!(rebuilt.is_not_found());
        assert_eq!(rebuilt.to_string(), "not found: attachment att1 not found");
    }

    #[test]
    fn test_rpc_code_wire_names() {
        let encoded = serde_json::to_string(&RpcCode::InvalidArgument).unwrap();
        assert_eq!(encoded, "\"invalid_argument\"");
    }
}
