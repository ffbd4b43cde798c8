//! AWS exporter CLI
//!
//! Local execution entry point. For AWS Lambda, use `aws-exporter-lambda`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use aws_config::{BehaviorVersion, Region};
use aws_exporter::{
    config::{ConfigLoader, resolve_credentials},
    error::{AppError, Result},
    expr::Expression,
    models::{ActionType, ExporterConfig, RunState, Settings, SourceIdentity},
    pipeline::{Deadline, RunOutcome, SyncEngine, TimeBudget, Unbounded},
    services::{AwsSourceRegistry, EntityMapper, PortClient},
    storage::{LocalSnapshotStore, SnapshotStore},
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info, warn};

/// Export AWS resources into a software catalog
#[derive(Parser, Debug)]
#[command(name = "aws-exporter", version, about = "AWS to catalog exporter")]
struct Cli {
    /// Runtime settings file
    #[arg(short, long, default_value = "settings.toml")]
    settings: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync every configured resource kind into the catalog
    Sync {
        /// Directory holding the exporter document and checkpoints
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Exporter document key inside the state directory
        #[arg(long, default_value = "config.json")]
        config_key: String,

        /// Checkpoint key to resume from
        #[arg(long)]
        resume: Option<String>,

        /// Stop and checkpoint after this many seconds
        #[arg(long)]
        budget_secs: Option<u64>,

        /// AWS account id used to tag entities
        #[arg(long)]
        account_id: String,

        /// Default region, overriding the AWS profile
        #[arg(long)]
        region: Option<String>,
    },

    /// Print the entities a resource document maps to
    Map {
        /// Exporter document
        #[arg(short, long)]
        config: PathBuf,

        /// Resource kind whose mappings to apply
        #[arg(short, long)]
        kind: String,

        /// Resource document (stdin when omitted)
        #[arg(short, long)]
        resource: Option<PathBuf>,

        /// Produce delete entities instead of upserts
        #[arg(long)]
        delete: bool,
    },

    /// Evaluate an expression against a JSON document
    Eval {
        expression: String,

        /// Input document (stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Validate settings and compile every expression of a document
    Validate {
        /// Exporter document
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Initialize logging based on verbosity flags.
fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn read_json(path: Option<&Path>) -> Result<Value> {
    let content = match path {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    Ok(serde_json::from_str(&content)?)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let mut settings = Settings::load_or_default(&cli.settings);
    settings.apply_env_overrides();

    match cli.command {
        Command::Sync {
            state_dir,
            config_key,
            resume,
            budget_secs,
            account_id,
            region,
        } => {
            let sdk = match region {
                Some(region) => {
                    aws_config::defaults(BehaviorVersion::latest())
                        .region(Region::new(region))
                        .load()
                        .await
                }
                None => aws_config::load_defaults(BehaviorVersion::latest()).await,
            };
            let region = sdk
                .region()
                .map(ToString::to_string)
                .ok_or_else(|| AppError::config("No AWS region configured, use --region"))?;
            let identity = SourceIdentity::new(account_id, region);

            let store: Arc<dyn SnapshotStore> = Arc::new(LocalSnapshotStore::new(&state_dir));
            let loader = ConfigLoader::new(store.clone(), config_key);
            let segment_id = chrono::Utc::now().format("%Y%m%dT%H%M%S").to_string();
            let loaded = loader.load(resume.as_deref(), &segment_id).await?;
            let mut config = loaded.config;

            if let Some(url) = config.port_api_url.clone() {
                settings.catalog.api_url = url;
            }
            settings.validate()?;

            let credentials = resolve_credentials([
                (
                    std::env::var("PORT_CLIENT_ID").ok(),
                    std::env::var("PORT_CLIENT_SECRET").ok(),
                ),
                (config.port_client_id.take(), config.port_client_secret.take()),
            ])
            .ok_or_else(|| {
                AppError::config("Set PORT_CLIENT_ID and PORT_CLIENT_SECRET or add them to the config")
            })?;

            let user_agent = identity.user_agent(&settings.catalog.exporter_name);
            let catalog =
                Arc::new(PortClient::connect(&credentials, &settings.catalog, &user_agent).await?);
            let registry = Arc::new(AwsSourceRegistry::new(&sdk, &settings.concurrency));
            let engine = SyncEngine::new(registry, catalog, settings, identity);

            let budget: Box<dyn TimeBudget> = match budget_secs {
                Some(secs) => Box::new(Deadline::after(Duration::from_secs(secs))),
                None => Box::new(Unbounded),
            };

            match engine.run(RunState::from_config(&config), budget.as_ref()).await {
                RunOutcome::Completed { state, reap } => {
                    info!(
                        entities = state.accumulated.len(),
                        deleted = reap.map_or(0, |r| r.deleted),
                        skip_delete = state.skip_delete(),
                        "Sync complete!"
                    );
                }
                RunOutcome::Checkpointed(state) => {
                    let snapshot = state.to_snapshot(&config);
                    store
                        .save_snapshot(&loaded.continuation_key, &snapshot)
                        .await?;
                    warn!(
                        location = %store.location(&loaded.continuation_key),
                        "Budget exhausted, resume with --resume {}",
                        loaded.continuation_key
                    );
                }
            }
        }

        Command::Map {
            config,
            kind,
            resource,
            delete,
        } => {
            let config = ExporterConfig::load(&config)?;
            let document = read_json(resource.as_deref())?;
            let action = if delete {
                ActionType::Delete
            } else {
                ActionType::Upsert
            };

            let mut entities = Vec::new();
            for resource_config in config.resources_of_kind(&kind) {
                let mapped =
                    EntityMapper::for_resource(resource_config)?.create_entities(&document, action)?;
                for failure in &mapped.failures {
                    error!(kind = %kind, error = %failure, "Mapping failed");
                }
                entities.extend(mapped.entities);
            }
            if entities.is_empty() {
                warn!(kind = %kind, "No entities produced");
            }
            print_json(&entities)?;
        }

        Command::Eval { expression, input } => {
            let expression = Expression::compile(&expression)?;
            let document = read_json(input.as_deref())?;
            for value in expression.evaluate(&document)? {
                print_json(&value)?;
            }
        }

        Command::Validate { config } => {
            info!("Validating configuration...");
            settings.validate()?;
            info!("✓ Settings OK");

            let config = ExporterConfig::load(&config)?;
            let mut invalid = 0;
            for resource in &config.resources {
                match EntityMapper::for_resource(resource) {
                    Ok(_) => info!(kind = %resource.kind, "✓ Mappings OK"),
                    Err(e) => {
                        error!(kind = %resource.kind, error = %e, "Invalid mappings");
                        invalid += 1;
                    }
                }
            }
            if invalid > 0 {
                return Err(AppError::validation(format!(
                    "{invalid} resource kinds have invalid mappings"
                )));
            }
            info!("All validations passed!");
        }
    }

    Ok(())
}
