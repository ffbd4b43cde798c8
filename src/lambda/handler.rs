//! Lambda entry handler.

use std::sync::Arc;
use std::time::Instant;

use aws_config::BehaviorVersion;
use lambda_runtime::{Context, Error as LambdaError, LambdaEvent};
use tracing::{error, info, instrument};

use super::{LambdaReinvoker, SyncRequest, SyncResponse, hand_off, handle_records};
use crate::config::{ConfigLoader, load_secret_credentials, resolve_credentials};
use crate::error::{AppError, Result};
use crate::models::{RunState, Settings, SourceIdentity};
use crate::pipeline::{Deadline, RunOutcome, SyncEngine};
use crate::services::{AwsSourceRegistry, CatalogCredentials, PortClient};
use crate::storage::{S3SnapshotStore, SnapshotStore};

/// Main Lambda handler function.
#[instrument(skip(event), fields(request_id = %event.context.request_id))]
pub async fn handler(event: LambdaEvent<SyncRequest>) -> std::result::Result<SyncResponse, LambdaError> {
    let start = Instant::now();
    let (request, context) = event.into_parts();

    let mut response = match run(&request, &context).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Sync failed");
            SyncResponse::failed(&e)
        }
    };
    response.execution_time_ms = start.elapsed().as_millis() as u64;
    info!(
        status = ?response.status,
        entities = response.entities,
        deleted = response.deleted,
        skip_delete = response.skip_delete,
        execution_time_ms = response.execution_time_ms,
        "Invocation finished"
    );
    Ok(response)
}

async fn run(request: &SyncRequest, context: &Context) -> Result<SyncResponse> {
    let identity = SourceIdentity::from_function_arn(&context.invoked_function_arn)?;
    let mut settings = Settings::default();
    settings.apply_env_overrides();

    let sdk = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let store: Arc<dyn SnapshotStore> = Arc::new(S3SnapshotStore::from_env(&sdk)?);
    let loader = ConfigLoader::from_env(store.clone())?;
    let loaded = loader
        .load(request.next_config_file_key.as_deref(), &context.request_id)
        .await?;
    let mut config = loaded.config;

    if let Some(url) = request.port_api_url.clone().or(config.port_api_url.clone()) {
        settings.catalog.api_url = url;
    }
    settings.validate()?;

    let credentials = match resolve_credentials([
        (request.port_client_id.clone(), request.port_client_secret.clone()),
        (config.port_client_id.take(), config.port_client_secret.take()),
    ]) {
        Some(credentials) => credentials,
        None => secret_credentials(&sdk).await?,
    };

    let user_agent = identity.user_agent(&settings.catalog.exporter_name);
    let catalog = Arc::new(PortClient::connect(&credentials, &settings.catalog, &user_agent).await?);
    let registry = Arc::new(AwsSourceRegistry::new(&sdk, &settings.concurrency));
    let engine = SyncEngine::new(registry, catalog, settings, identity);

    if !request.records.is_empty() {
        return Ok(handle_records(&engine, &config, &request.records).await);
    }

    info!(resumed = loaded.resumed, kinds = config.resources.len(), "Starting sync");
    let budget = Deadline::from_epoch_millis(context.deadline);
    match engine.run(RunState::from_config(&config), &budget).await {
        RunOutcome::Completed { state, reap } => Ok(SyncResponse::completed(&state, reap)),
        RunOutcome::Checkpointed(state) => {
            let reinvoker = LambdaReinvoker::new(
                aws_sdk_lambda::Client::new(&sdk),
                context.invoked_function_arn.clone(),
            );
            Ok(hand_off(
                state,
                &config,
                store.as_ref(),
                &reinvoker,
                &loaded.continuation_key,
                request,
            )
            .await)
        }
    }
}

async fn secret_credentials(sdk: &aws_config::SdkConfig) -> Result<CatalogCredentials> {
    let arn = std::env::var("PORT_CREDS_SECRET_ARN")
        .map_err(|_| AppError::config("Missing catalog credentials"))?;
    load_secret_credentials(&aws_sdk_secretsmanager::Client::new(sdk), &arn).await
}
