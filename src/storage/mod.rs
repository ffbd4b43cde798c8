//! Storage of exporter documents and checkpoint snapshots.
//!
//! Checkpoints are written once under a fresh continuation key, read by the
//! resuming segment and deleted right after.
//!
//! ## Key Layout
//!
//! ```text
//! {bucket or root}/
//! ├── config.json                 # Exporter document
//! └── {request id}/
//!     └── config.json             # Checkpoint of a cut-short segment
//! ```

pub mod local;
pub mod s3;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ExporterConfig;

pub use local::LocalSnapshotStore;
pub use s3::S3SnapshotStore;

/// Blob storage for exporter documents.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Read an object, `None` when it does not exist.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Human readable location of a key, for logs.
    fn location(&self, key: &str) -> String;

    /// Read and parse an exporter document.
    async fn load_snapshot(&self, key: &str) -> Result<Option<ExporterConfig>> {
        match self.read(key).await? {
            Some(bytes) => Ok(Some(ExporterConfig::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write an exporter document.
    async fn save_snapshot(&self, key: &str, snapshot: &ExporterConfig) -> Result<()> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.write(key, bytes).await
    }
}
