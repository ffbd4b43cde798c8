// src/config.rs

//! Exporter document and credential loading.
//!
//! A fresh run reads the exporter document from its configured key. A
//! resumed run reads the checkpoint named by the invocation payload instead
//! and deletes it, so each checkpoint is consumed exactly once.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::models::ExporterConfig;
use crate::services::CatalogCredentials;
use crate::storage::SnapshotStore;

/// Document loaded for one segment.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: ExporterConfig,
    /// Key a checkpoint of this segment is written to
    pub continuation_key: String,
    /// Whether this segment resumes a checkpoint
    pub resumed: bool,
}

/// Loads exporter documents from a [`SnapshotStore`].
pub struct ConfigLoader {
    store: Arc<dyn SnapshotStore>,
    config_key: String,
}

impl ConfigLoader {
    pub fn new(store: Arc<dyn SnapshotStore>, config_key: impl Into<String>) -> Self {
        Self {
            store,
            config_key: config_key.into(),
        }
    }

    /// Build a loader from `CONFIG_JSON_FILE_KEY`.
    pub fn from_env(store: Arc<dyn SnapshotStore>) -> Result<Self> {
        let key = std::env::var("CONFIG_JSON_FILE_KEY")
            .map_err(|_| AppError::config("CONFIG_JSON_FILE_KEY is not set"))?;
        Ok(Self::new(store, key))
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Load the document for a segment.
    ///
    /// With `next_key` the checkpoint is read and then deleted; a failed
    /// delete is only logged.
    pub async fn load(&self, next_key: Option<&str>, request_id: &str) -> Result<LoadedConfig> {
        let continuation_key = continuation_key(&self.config_key, request_id);

        let Some(next_key) = next_key else {
            info!(location = %self.store.location(&self.config_key), "Loading exporter config");
            let config = self.store.load_snapshot(&self.config_key).await?.ok_or_else(|| {
                AppError::config(format!(
                    "Config file not found: {}",
                    self.store.location(&self.config_key)
                ))
            })?;
            return Ok(LoadedConfig {
                config,
                continuation_key,
                resumed: false,
            });
        };

        if next_key == self.config_key {
            return Err(AppError::config(format!(
                "Continuation key must differ from the config key: {next_key}"
            )));
        }

        info!(location = %self.store.location(next_key), "Resuming from checkpoint");
        let config = self.store.load_snapshot(next_key).await?.ok_or_else(|| {
            AppError::config(format!(
                "Checkpoint not found: {}",
                self.store.location(next_key)
            ))
        })?;
        if let Err(e) = self.store.delete(next_key).await {
            warn!(
                location = %self.store.location(next_key),
                error = %e,
                "Failed to delete consumed checkpoint"
            );
        }

        Ok(LoadedConfig {
            config,
            continuation_key,
            resumed: true,
        })
    }
}

/// Key of the checkpoint written by the segment handling `request_id`.
pub fn continuation_key(config_key: &str, request_id: &str) -> String {
    match config_key.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/{request_id}/config.json"),
        None => format!("{request_id}/config.json"),
    }
}

#[derive(Deserialize)]
struct SecretCredentials {
    id: String,
    #[serde(rename = "clientSecret")]
    client_secret: String,
}

/// Parse a `{"id": .., "clientSecret": ..}` secret.
pub fn parse_secret_credentials(secret: &str) -> Result<CatalogCredentials> {
    let secret: SecretCredentials = serde_json::from_str(secret)
        .map_err(|e| AppError::config(format!("Invalid credentials secret: {e}")))?;
    Ok(CatalogCredentials {
        client_id: secret.id,
        client_secret: secret.client_secret,
    })
}

/// Read catalog credentials from a Secrets Manager secret.
pub async fn load_secret_credentials(
    client: &aws_sdk_secretsmanager::Client,
    secret_arn: &str,
) -> Result<CatalogCredentials> {
    let output = client
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| AppError::aws("secretsmanager", e))?;
    let secret = output
        .secret_string()
        .ok_or_else(|| AppError::config(format!("Secret {secret_arn} has no string value")))?;
    parse_secret_credentials(secret)
}

/// First complete credential pair in priority order.
pub fn resolve_credentials(
    candidates: impl IntoIterator<Item = (Option<String>, Option<String>)>,
) -> Option<CatalogCredentials> {
    candidates.into_iter().find_map(|pair| match pair {
        (Some(client_id), Some(client_secret)) => Some(CatalogCredentials {
            client_id,
            client_secret,
        }),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalSnapshotStore;
    use tempfile::TempDir;

    fn loader(tmp: &TempDir) -> ConfigLoader {
        ConfigLoader::new(
            Arc::new(LocalSnapshotStore::new(tmp.path())),
            "exporter/config.json",
        )
    }

    #[test]
    fn test_continuation_key() {
        assert_eq!(
            continuation_key("exporter/config.json", "req-1"),
            "exporter/req-1/config.json"
        );
        assert_eq!(continuation_key("config.json", "req-1"), "req-1/config.json");
    }

    #[tokio::test]
    async fn test_fresh_load() {
        let tmp = TempDir::new().unwrap();
        let loader = loader(&tmp);
        loader
            .store()
            .write("exporter/config.json", br#"{"resources": []}"#.to_vec())
            .await
            .unwrap();

        let loaded = loader.load(None, "req-1").await.unwrap();
        assert!(!loaded.resumed);
        assert_eq!(loaded.continuation_key, "exporter/req-1/config.json");
    }

    #[tokio::test]
    async fn test_checkpoint_is_consumed() {
        let tmp = TempDir::new().unwrap();
        let loader = loader(&tmp);
        loader
            .store()
            .write("exporter/old/config.json", br#"{"resources": [], "skip_delete": true}"#.to_vec())
            .await
            .unwrap();

        let loaded = loader
            .load(Some("exporter/old/config.json"), "req-2")
            .await
            .unwrap();
        assert!(loaded.resumed);
        assert!(loaded.config.skip_delete);
        assert!(
            loader
                .store()
                .read("exporter/old/config.json")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_rejects_config_key_as_continuation() {
        let tmp = TempDir::new().unwrap();
        let err = loader(&tmp)
            .load(Some("exporter/config.json"), "req")
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_missing_config_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let err = loader(&tmp).load(None, "req").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_document_without_resources_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let loader = loader(&tmp);
        loader
            .store()
            .write("exporter/config.json", br#"{"resource": []}"#.to_vec())
            .await
            .unwrap();

        let err = loader.load(None, "req").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_secret_and_priority() {
        let creds = parse_secret_credentials(r#"{"id": "cid", "clientSecret": "cs"}"#).unwrap();
        assert_eq!(creds.client_id, "cid");
        assert!(parse_secret_credentials("{}").is_err());

        let resolved = resolve_credentials([
            (Some("event".to_string()), None),
            (Some("doc".to_string()), Some("doc-secret".to_string())),
            (Some("other".to_string()), Some("other-secret".to_string())),
        ])
        .unwrap();
        assert_eq!(resolved.client_id, "doc");
    }
}
