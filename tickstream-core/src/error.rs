//! Publisher errors

use thiserror::Error;

/// Errors returned by [`Publisher`](crate::Publisher) operations.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Backing store rejected or failed the operation.
    #[error("store error: {0}")]
    Store(String),

    /// Payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// No object exists under the requested key.
    #[error("key not found")]
    NotFound,
}

impl PublishError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}
