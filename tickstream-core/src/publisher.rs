//! Publisher contract
//!
//! A publisher is an opaque keyed byte store. The flush scheduler and feed
//! managers only ever talk to this trait; whether the bytes land in S3 or an
//! in-memory map is a wiring decision.

use async_trait::async_trait;

use crate::error::PublishError;

/// Keyed byte store with list and delete.
///
/// Keys are opaque strings; the conventional layout is
/// `{source}/{feed_name}/{start}-{end}` but nothing here depends on it.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Store `data` under `key`, overwriting any existing object.
    async fn publish(&self, key: &str, data: &[u8]) -> Result<(), PublishError>;

    /// Fetch the object stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, PublishError>;

    /// Delete the object stored under `key`. Deleting a missing key is not an
    /// error.
    async fn delete(&self, key: &str) -> Result<(), PublishError>;

    /// List every key starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, PublishError>;

    /// Serialize `value` as JSON and store it under `key`.
    async fn publish_json(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), PublishError> {
        let bytes = serde_json::to_vec(value)?;
        self.publish(key, &bytes).await
    }
}
