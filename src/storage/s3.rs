//! AWS S3 snapshot storage.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::storage::SnapshotStore;

/// Snapshot storage in one S3 bucket.
pub struct S3SnapshotStore {
    client: Client,
    bucket: String,
}

impl S3SnapshotStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Create S3 storage from the Lambda environment (`BUCKET_NAME`).
    pub fn from_env(sdk: &aws_config::SdkConfig) -> Result<Self> {
        let bucket = std::env::var("BUCKET_NAME")
            .map_err(|_| AppError::config("BUCKET_NAME is not set"))?;
        Ok(Self::new(Client::new(sdk), bucket))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl SnapshotStore for S3SnapshotStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::aws("s3", e))?;
                debug!(location = %self.location(key), "Read object");
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    info!(location = %self.location(key), "No object found");
                    Ok(None)
                } else {
                    Err(AppError::aws("s3", service_err))
                }
            }
        }
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| AppError::aws("s3", e))?;

        info!(location = %self.location(key), "Wrote object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::aws("s3", e))?;

        info!(location = %self.location(key), "Deleted object");
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}
