//! S3-backed publisher.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{operation::get_object::GetObjectError, primitives::ByteStream, Client};
use tracing::info;

use tickstream_core::{PublishError, Publisher};

/// Publisher writing objects to one S3 bucket, optionally under a key prefix.
///
/// Credentials and region come from the standard AWS environment
/// (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_REGION`).
pub struct S3Publisher {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Publisher {
    /// `bucket` falls back to `S3_BUCKET_NAME` when `None`.
    pub async fn new(bucket: Option<String>, prefix: impl Into<String>) -> Result<Self, PublishError> {
        let bucket = match bucket {
            Some(bucket) => bucket,
            None => std::env::var("S3_BUCKET_NAME")
                .map_err(|_| PublishError::store("no bucket given and S3_BUCKET_NAME unset"))?,
        };
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let client = Client::new(&config);
        info!("S3 publisher initialized with bucket: {}", bucket);
        Ok(Self {
            client,
            bucket,
            prefix: prefix.into(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        full_key(&self.prefix, key)
    }
}

fn full_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}/{key}")
    }
}

#[async_trait]
impl Publisher for S3Publisher {
    async fn publish(&self, key: &str, data: &[u8]) -> Result<(), PublishError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| PublishError::store(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, PublishError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| PublishError::store(format!("failed to read S3 body: {e}")))?
                    .into_bytes();
                Ok(bytes.to_vec())
            }
            Err(e) => {
                if let Some(GetObjectError::NoSuchKey(_)) = e.as_service_error() {
                    return Err(PublishError::NotFound);
                }
                let error_str = e.to_string();
                if error_str.contains("NoSuchKey") || error_str.contains("404") {
                    Err(PublishError::NotFound)
                } else {
                    Err(PublishError::store(error_str))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), PublishError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| PublishError::store(e.to_string()))?;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, PublishError> {
        let full_prefix = self.full_key(prefix);
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix);
            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let result = request
                .send()
                .await
                .map_err(|e| PublishError::store(e.to_string()))?;

            for object in result.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            continuation_token = result.next_continuation_token().map(str::to_string);
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(keys)
    }
}
