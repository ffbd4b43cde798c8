// src/lambda/mod.rs

//! AWS Lambda hosting of the sync engine.
//!
//! One invocation runs one segment:
//! 1. Loads the exporter document (or the checkpoint it was re-invoked with)
//! 2. Authenticates against the catalog
//! 3. Handles queued single-resource events, or runs the full sync
//! 4. On a checkpoint, saves the remaining work and invokes itself again

#[cfg(feature = "lambda")]
mod handler;

use async_trait::async_trait;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{AppError, Result};
use crate::models::{ExporterConfig, RunState};
use crate::pipeline::{ReapReport, SyncEngine};
use crate::storage::SnapshotStore;

#[cfg(feature = "lambda")]
pub use handler::handler;

/// Lambda invocation payload.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SyncRequest {
    /// Checkpoint to resume from
    #[serde(default)]
    pub next_config_file_key: Option<String>,

    #[serde(default)]
    pub port_client_id: Option<String>,

    #[serde(default)]
    pub port_client_secret: Option<String>,

    #[serde(default)]
    pub port_api_url: Option<String>,

    /// Queued single-resource events
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueRecord>,
}

/// One queued message.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueRecord {
    pub body: String,
}

/// Payload of the follow-up invocation.
///
/// Credentials given to this invocation are forwarded so they never have to
/// be written to the checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReinvokePayload {
    pub next_config_file_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_api_url: Option<String>,
}

impl ReinvokePayload {
    pub fn new(continuation_key: &str, request: &SyncRequest) -> Self {
        Self {
            next_config_file_key: continuation_key.to_string(),
            port_client_id: request.port_client_id.clone(),
            port_client_secret: request.port_client_secret.clone(),
            port_api_url: request.port_api_url.clone(),
        }
    }
}

/// Starts the next segment of a checkpointed run.
#[async_trait]
pub trait Reinvoker: Send + Sync {
    async fn reinvoke(&self, payload: &ReinvokePayload) -> Result<()>;
}

/// Asynchronous self-invocation of the running function.
pub struct LambdaReinvoker {
    client: aws_sdk_lambda::Client,
    function: String,
}

impl LambdaReinvoker {
    pub fn new(client: aws_sdk_lambda::Client, function: impl Into<String>) -> Self {
        Self {
            client,
            function: function.into(),
        }
    }
}

#[async_trait]
impl Reinvoker for LambdaReinvoker {
    async fn reinvoke(&self, payload: &ReinvokePayload) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        self.client
            .invoke()
            .function_name(&self.function)
            .invocation_type(InvocationType::Event)
            .payload(Blob::new(body))
            .send()
            .await
            .map_err(|e| AppError::aws("lambda", e))?;
        info!(function = %self.function, "Invoked next segment");
        Ok(())
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Every kind drained
    Completed,
    /// Work left; the next segment was invoked
    Checkpointed,
    /// Work left but the hand-off failed
    Partial,
    /// Queued events handled
    Events,
    Failed,
}

/// Lambda response payload.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub status: SyncStatus,
    /// Entity keys produced so far in the run
    pub entities: usize,
    /// Stale entities deleted
    pub deleted: usize,
    pub skip_delete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl SyncResponse {
    fn new(status: SyncStatus, state: &RunState) -> Self {
        Self {
            success: status != SyncStatus::Failed,
            status,
            entities: state.accumulated.len(),
            deleted: 0,
            skip_delete: state.skip_delete(),
            continuation_key: None,
            error: None,
            execution_time_ms: 0,
        }
    }

    pub fn completed(state: &RunState, reap: Option<ReapReport>) -> Self {
        Self {
            deleted: reap.map_or(0, |r| r.deleted),
            ..Self::new(SyncStatus::Completed, state)
        }
    }

    pub fn failed(error: &AppError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(SyncStatus::Failed, &RunState::default())
        }
    }
}

/// Persist a checkpoint and start the next segment.
///
/// A failed save forces `skip_delete` and skips the re-invocation; the
/// run is reported as partial instead of failing.
pub async fn hand_off(
    mut state: RunState,
    base: &ExporterConfig,
    store: &dyn SnapshotStore,
    reinvoker: &dyn Reinvoker,
    continuation_key: &str,
    request: &SyncRequest,
) -> SyncResponse {
    info!(
        location = %store.location(continuation_key),
        remaining = state.resources.len(),
        "Budget nearly exhausted, handing off to a new invocation"
    );

    let snapshot = state.to_snapshot(base);
    if let Err(e) = store.save_snapshot(continuation_key, &snapshot).await {
        warn!(
            location = %store.location(continuation_key),
            error = %e,
            "Failed to save checkpoint"
        );
        state.mark_skip_delete();
        return SyncResponse {
            error: Some(e.to_string()),
            ..SyncResponse::new(SyncStatus::Partial, &state)
        };
    }

    let payload = ReinvokePayload::new(continuation_key, request);
    match reinvoker.reinvoke(&payload).await {
        Ok(()) => SyncResponse {
            continuation_key: Some(continuation_key.to_string()),
            ..SyncResponse::new(SyncStatus::Checkpointed, &state)
        },
        Err(e) => {
            error!(error = %e, "Failed to invoke next segment");
            SyncResponse {
                continuation_key: Some(continuation_key.to_string()),
                error: Some(e.to_string()),
                ..SyncResponse::new(SyncStatus::Partial, &state)
            }
        }
    }
}

/// Handle queued single-resource events; a bad record never stops the rest.
pub async fn handle_records(
    engine: &SyncEngine,
    config: &ExporterConfig,
    records: &[QueueRecord],
) -> SyncResponse {
    info!(count = records.len(), "Handling queued events");
    let mut state = RunState::default();
    let mut failures = 0;

    for record in records {
        let result = match serde_json::from_str::<Value>(&record.body) {
            Ok(message) => engine.handle_event(config, &message).await,
            Err(e) => Err(AppError::from(e)),
        };
        match result {
            Ok(outcome) => state.absorb(outcome.keys, outcome.failed),
            Err(e) => {
                error!(body = %record.body, error = %e, "Failed to handle event");
                failures += 1;
            }
        }
    }

    SyncResponse {
        error: (failures > 0).then(|| format!("{failures} of {} events failed", records.len())),
        ..SyncResponse::new(SyncStatus::Events, &state)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::models::{EntityKey, Settings, SourceIdentity};
    use crate::storage::LocalSnapshotStore;
    use crate::testing::{MemorySource, RecordingCatalog, StaticRegistry};
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingReinvoker {
        payloads: Mutex<Vec<ReinvokePayload>>,
    }

    #[async_trait]
    impl Reinvoker for RecordingReinvoker {
        async fn reinvoke(&self, payload: &ReinvokePayload) -> Result<()> {
            self.payloads.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    struct ReadOnlyStore;

    #[async_trait]
    impl SnapshotStore for ReadOnlyStore {
        async fn read(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn write(&self, key: &str, _bytes: Vec<u8>) -> Result<()> {
            Err(AppError::fetch(key, "access denied"))
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        fn location(&self, key: &str) -> String {
            format!("readonly://{key}")
        }
    }

    fn base() -> ExporterConfig {
        serde_json::from_value(json!({
            "resources": [{
                "kind": "AWS::S3::Bucket",
                "port": {"entity": {"mappings": [{"identifier": ".Name", "blueprint": "bucket"}]}}
            }],
            "port_client_id": "doc-id",
            "port_client_secret": "doc-secret"
        }))
        .unwrap()
    }

    fn request() -> SyncRequest {
        serde_json::from_value(json!({
            "port_client_id": "cid",
            "port_client_secret": "cs"
        }))
        .unwrap()
    }

    #[test]
    fn test_request_parsing() {
        let request: SyncRequest = serde_json::from_value(json!({
            "next_config_file_key": "exporter/r/config.json",
            "Records": [{"body": "{}", "messageId": "1"}]
        }))
        .unwrap();
        assert_eq!(request.next_config_file_key.as_deref(), Some("exporter/r/config.json"));
        assert_eq!(request.records.len(), 1);

        let empty: SyncRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.records.is_empty());
    }

    #[tokio::test]
    async fn test_hand_off_saves_and_reinvokes() {
        let tmp = TempDir::new().unwrap();
        let store = LocalSnapshotStore::new(tmp.path());
        let reinvoker = RecordingReinvoker::default();
        let mut state = RunState::from_config(&base());
        state.absorb([EntityKey::new("bucket", "a")], false);

        let response = hand_off(state, &base(), &store, &reinvoker, "r/config.json", &request()).await;

        assert_eq!(response.status, SyncStatus::Checkpointed);
        assert!(!response.skip_delete);
        let saved = store.load_snapshot("r/config.json").await.unwrap().unwrap();
        assert_eq!(saved.aws_entities.len(), 1);
        assert!(saved.port_client_id.is_none());

        let payloads = reinvoker.payloads.lock().unwrap();
        assert_eq!(payloads[0].next_config_file_key, "r/config.json");
        assert_eq!(payloads[0].port_client_id.as_deref(), Some("cid"));
    }

    #[tokio::test]
    async fn test_failed_save_forces_skip_delete() {
        let reinvoker = RecordingReinvoker::default();
        let state = RunState::from_config(&base());

        let response = hand_off(
            state,
            &base(),
            &ReadOnlyStore,
            &reinvoker,
            "r/config.json",
            &SyncRequest::default(),
        )
        .await;

        assert_eq!(response.status, SyncStatus::Partial);
        assert!(response.success);
        assert!(response.skip_delete);
        assert!(reinvoker.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_record_does_not_stop_others() {
        let catalog = Arc::new(RecordingCatalog::default());
        let engine = SyncEngine::new(
            Arc::new(StaticRegistry(Arc::new(MemorySource::default()))),
            catalog.clone(),
            Settings::default(),
            SourceIdentity::new("1", "us-east-1"),
        );
        let good = json!({
            "resource_type": "AWS::S3::Bucket",
            "identifier": "\"logs\"",
            "region": "\"us-east-1\""
        });
        let records = vec![
            QueueRecord {
                body: "not json".into(),
            },
            QueueRecord {
                body: good.to_string(),
            },
        ];

        let response = handle_records(&engine, &base(), &records).await;

        assert_eq!(response.status, SyncStatus::Events);
        assert_eq!(response.entities, 1);
        assert_eq!(response.error.as_deref(), Some("1 of 2 events failed"));
        assert!(catalog.stored_keys().contains(&EntityKey::new("bucket", "logs")));
    }

    #[test]
    fn test_response_serialization() {
        let response = SyncResponse::failed(&AppError::config("boom"));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["success"], false);
        assert!(value.get("continuation_key").is_none());
    }
}
