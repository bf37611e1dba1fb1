//! In-memory publisher for tests and local runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use tickstream_core::{PublishError, Publisher};

/// Keyed byte store backed by a `BTreeMap`, so `list_keys` comes back sorted.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Fetch and deserialize one stored object; test convenience.
    pub fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        let objects = self.objects.lock();
        serde_json::from_slice(objects.get(key)?).ok()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, key: &str, data: &[u8]) -> Result<(), PublishError> {
        self.objects.lock().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, PublishError> {
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or(PublishError::NotFound)
    }

    async fn delete(&self, key: &str) -> Result<(), PublishError> {
        self.objects.lock().remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, PublishError> {
        Ok(self
            .objects
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
