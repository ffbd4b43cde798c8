// src/pipeline/fetch.rs

//! Paginated fetch of one resource kind.
//!
//! Walks every configured region, every pending sub-listing ("resource
//! model") of that region and every page of it. Each page fans out describe,
//! map and write across a bounded worker pool. The budget is checked after
//! every page; when it runs low the position is written back into the
//! resource config so a later segment resumes exactly there.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use super::budget::BudgetCheck;
use crate::error::Result;
use crate::models::{ActionType, EntityKey, ResourceConfig};
use crate::services::{EntityDispatcher, EntityMapper, ListRequest, ResourceSource};

/// Where a kind stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindStatus {
    /// Every region was walked to its last page
    Drained,
    /// The budget ran out; the config holds the resume position
    Checkpointed,
}

/// Result of syncing one kind.
#[derive(Debug)]
pub struct KindOutcome {
    pub keys: BTreeSet<EntityKey>,
    pub skip_delete: bool,
    pub status: KindStatus,
}

/// Result of one listed item.
#[derive(Debug, Default)]
pub struct ItemOutcome {
    pub keys: BTreeSet<EntityKey>,
    pub failed: bool,
}

impl ItemOutcome {
    fn failed() -> Self {
        Self {
            keys: BTreeSet::new(),
            failed: true,
        }
    }
}

/// Fetches, maps and writes the resources of one kind.
pub struct ResourceFetcher {
    kind: String,
    source: Arc<dyn ResourceSource>,
    mapper: EntityMapper,
    dispatcher: EntityDispatcher,
    workers: usize,
}

impl ResourceFetcher {
    /// Build a fetcher for a resource config.
    ///
    /// Fails when the selector or a mapping does not compile.
    pub fn new(
        config: &ResourceConfig,
        source: Arc<dyn ResourceSource>,
        dispatcher: EntityDispatcher,
        default_workers: usize,
    ) -> Result<Self> {
        let mapper = EntityMapper::for_resource(config)?;
        let workers = source.describe_workers().unwrap_or(default_workers).max(1);
        Ok(Self {
            kind: config.kind.clone(),
            source,
            mapper,
            dispatcher,
            workers,
        })
    }

    /// Sync the kind until it is drained or the budget runs out.
    ///
    /// `config` is updated in place: drained regions and sub-listings are
    /// removed and the cursor of the interrupted listing is stored.
    pub async fn sync(
        &self,
        config: &mut ResourceConfig,
        default_region: &str,
        budget: &BudgetCheck<'_>,
    ) -> KindOutcome {
        let mut outcome = KindOutcome {
            keys: BTreeSet::new(),
            skip_delete: false,
            status: KindStatus::Drained,
        };
        config.pin_regions(default_region);

        'regions: for region in config.regions(default_region) {
            let models: Vec<Option<String>> = match config
                .region_state(&region)
                .and_then(|state| state.resources_models.clone())
            {
                Some(models) => models.into_iter().map(Some).collect(),
                None => vec![None],
            };

            for model in models {
                let mut cursor = config
                    .region_state(&region)
                    .and_then(|state| state.next_token.clone());

                loop {
                    info!(
                        kind = %self.kind,
                        region = %region,
                        resource_model = model.as_deref(),
                        "Listing resources"
                    );
                    let empty = Map::new();
                    let request = ListRequest {
                        parameters: &config.selector.aws.list_parameters,
                        cursor: cursor.as_deref(),
                        resource_model: model.as_deref(),
                        region_options: config
                            .region_state(&region)
                            .map_or(&empty, |state| &state.extra),
                    };
                    let page = match self.source.list(&region, &request).await {
                        Ok(page) => page,
                        Err(e) => {
                            error!(
                                kind = %self.kind,
                                region = %region,
                                resource_model = model.as_deref(),
                                error = %e,
                                "Failed to list resources"
                            );
                            outcome.skip_delete = true;
                            config.remove_region(&region);
                            continue 'regions;
                        }
                    };

                    for item in self.process_page(&region, page.identifiers).await {
                        outcome.keys.extend(item.keys);
                        outcome.skip_delete |= item.failed;
                    }
                    cursor = page.next_cursor;
                    config.region_state_mut(&region).next_token = cursor.clone();

                    if budget.exhausted() {
                        if cursor.is_none() && finish_model(config, &region, model.as_deref()) {
                            config.remove_region(&region);
                        }
                        if !config.is_drained() {
                            info!(
                                kind = %self.kind,
                                region = %region,
                                "Budget nearly exhausted, checkpointing"
                            );
                            outcome.status = KindStatus::Checkpointed;
                        }
                        return outcome;
                    }
                    if cursor.is_none() {
                        break;
                    }
                }

                finish_model(config, &region, model.as_deref());
            }

            config.remove_region(&region);
        }

        outcome
    }

    async fn process_page(&self, region: &str, identifiers: Vec<String>) -> Vec<ItemOutcome> {
        debug!(kind = %self.kind, region, count = identifiers.len(), "Processing page");
        stream::iter(identifiers)
            .map(|identifier| async move {
                self.process_item(region, &identifier, ActionType::Upsert)
                    .await
            })
            .buffer_unordered(self.workers)
            .collect()
            .await
    }

    /// Describe, map and write one resource.
    ///
    /// A delete only needs the identifier, so the describe call is skipped.
    pub async fn process_item(
        &self,
        region: &str,
        identifier: &str,
        action: ActionType,
    ) -> ItemOutcome {
        let document: Value = match action {
            ActionType::Upsert => match self.source.describe(region, identifier).await {
                Ok(document) => document,
                Err(e) => {
                    error!(
                        kind = %self.kind,
                        region,
                        identifier,
                        error = %e,
                        "Failed to describe resource"
                    );
                    return ItemOutcome::failed();
                }
            },
            ActionType::Delete => json!({ "identifier": identifier }),
        };

        let mapped = match self.mapper.create_entities(&document, action) {
            Ok(mapped) => mapped,
            Err(e) => {
                error!(
                    kind = %self.kind,
                    region,
                    identifier,
                    error = %e,
                    "Failed to transform resource"
                );
                return ItemOutcome::failed();
            }
        };
        for failure in &mapped.failures {
            warn!(
                kind = %self.kind,
                region,
                identifier,
                error = %failure,
                "Mapping failed"
            );
        }

        let failed = !mapped.is_clean();
        let keys = self.dispatcher.dispatch(mapped.entities, action).await;
        ItemOutcome { keys, failed }
    }
}

/// Mark a sub-listing of a region as done.
///
/// Returns whether the region has no sub-listing left.
fn finish_model(config: &mut ResourceConfig, region: &str, model: Option<&str>) -> bool {
    let state = config.region_state_mut(region);
    state.next_token = None;
    match (&mut state.resources_models, model) {
        (Some(models), Some(model)) => {
            if let Some(position) = models.iter().position(|m| m == model) {
                models.remove(position);
            }
            models.is_empty()
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::budget::Unbounded;
    use crate::testing::{MemorySource, PageBudget, RecordingCatalog};
    use serde_json::json;
    use std::time::Duration;

    fn config(value: Value) -> ResourceConfig {
        serde_json::from_value(value).unwrap()
    }

    fn bucket_config() -> ResourceConfig {
        config(json!({
            "kind": "AWS::S3::Bucket",
            "selector": {"aws": {"regions": ["us-east-1", "eu-west-1"]}},
            "port": {"entity": {"mappings": [
                {"identifier": ".Name", "blueprint": "bucket"}
            ]}}
        }))
    }

    fn source() -> MemorySource {
        MemorySource::default()
            .with_pages("us-east-1", &[&["a", "b"], &["c"]])
            .with_pages("eu-west-1", &[&["d"]])
    }

    fn fetcher(
        config: &ResourceConfig,
        source: MemorySource,
        catalog: Arc<RecordingCatalog>,
    ) -> ResourceFetcher {
        ResourceFetcher::new(
            config,
            Arc::new(source),
            EntityDispatcher::new(catalog, 2),
            3,
        )
        .unwrap()
    }

    fn keys(ids: &[&str]) -> BTreeSet<EntityKey> {
        ids.iter().map(|id| EntityKey::new("bucket", id)).collect()
    }

    #[tokio::test]
    async fn test_drains_every_region() {
        let catalog = Arc::new(RecordingCatalog::default());
        let mut config = bucket_config();
        let fetcher = fetcher(&config, source(), catalog.clone());

        let outcome = fetcher
            .sync(&mut config, "us-east-1", &BudgetCheck::new(&Unbounded, Duration::from_secs(1)))
            .await;

        assert_eq!(outcome.status, KindStatus::Drained);
        assert!(!outcome.skip_delete);
        assert_eq!(outcome.keys, keys(&["a", "b", "c", "d"]));
        assert!(config.is_drained());
        assert_eq!(catalog.stored_keys(), keys(&["a", "b", "c", "d"]));
    }

    #[tokio::test]
    async fn test_checkpoint_stores_cursor_and_resumes() {
        let catalog = Arc::new(RecordingCatalog::default());
        let mut config = bucket_config();
        let fetcher = fetcher(&config, source(), catalog.clone());

        let budget = PageBudget::new(0);
        let first = fetcher
            .sync(&mut config, "us-east-1", &BudgetCheck::new(&budget, Duration::from_secs(1)))
            .await;

        assert_eq!(first.status, KindStatus::Checkpointed);
        assert_eq!(first.keys, keys(&["a", "b"]));
        assert_eq!(
            config.region_state("us-east-1").unwrap().next_token.as_deref(),
            Some("1")
        );

        let snapshot: ResourceConfig =
            serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        let mut config = snapshot;
        let second = fetcher
            .sync(&mut config, "us-east-1", &BudgetCheck::new(&Unbounded, Duration::from_secs(1)))
            .await;

        assert_eq!(second.status, KindStatus::Drained);
        assert_eq!(second.keys, keys(&["c", "d"]));
    }

    #[tokio::test]
    async fn test_last_page_checkpoint_of_last_region_is_drained() {
        let catalog = Arc::new(RecordingCatalog::default());
        let mut config = config(json!({
            "kind": "AWS::S3::Bucket",
            "port": {"entity": {"mappings": [{"identifier": ".Name", "blueprint": "bucket"}]}}
        }));
        let source = MemorySource::default().with_pages("us-east-1", &[&["a"]]);
        let fetcher = fetcher(&config, source, catalog);

        let budget = PageBudget::new(0);
        let outcome = fetcher
            .sync(&mut config, "us-east-1", &BudgetCheck::new(&budget, Duration::from_secs(1)))
            .await;

        assert_eq!(outcome.status, KindStatus::Drained);
        assert!(config.is_drained());
    }

    #[tokio::test]
    async fn test_listing_failure_drains_region_and_sets_skip_delete() {
        let catalog = Arc::new(RecordingCatalog::default());
        let mut config = bucket_config();
        let source = Arc::new(source().failing_list("us-east-1"));
        let fetcher = ResourceFetcher::new(
            &config,
            source.clone(),
            EntityDispatcher::new(catalog, 2),
            3,
        )
        .unwrap();

        let outcome = fetcher
            .sync(&mut config, "us-east-1", &BudgetCheck::new(&Unbounded, Duration::from_secs(1)))
            .await;

        assert_eq!(outcome.status, KindStatus::Drained);
        assert!(outcome.skip_delete);
        assert_eq!(outcome.keys, keys(&["d"]));
        // One failed listing, then the other region's single page.
        assert_eq!(source.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_describe_failure_is_item_scoped() {
        let catalog = Arc::new(RecordingCatalog::default());
        let mut config = bucket_config();
        let fetcher = fetcher(&config, source().failing_describe("b"), catalog);

        let outcome = fetcher
            .sync(&mut config, "us-east-1", &BudgetCheck::new(&Unbounded, Duration::from_secs(1)))
            .await;

        assert!(outcome.skip_delete);
        assert_eq!(outcome.keys, keys(&["a", "c", "d"]));
    }

    #[tokio::test]
    async fn test_resource_models_are_walked_and_checkpointed() {
        let catalog = Arc::new(RecordingCatalog::default());
        let mut config = config(json!({
            "kind": "AWS::EKS::Nodegroup",
            "selector": {"aws": {
                "regions": ["us-east-1"],
                "regions_config": {"us-east-1": {"resources_models": ["{\"ClusterName\":\"x\"}", "{\"ClusterName\":\"y\"}"]}}
            }},
            "port": {"entity": {"mappings": [{"identifier": ".Name", "blueprint": "bucket"}]}}
        }));
        let source = MemorySource::default()
            .with_model_pages("us-east-1", "{\"ClusterName\":\"x\"}", &[&["a"]])
            .with_model_pages("us-east-1", "{\"ClusterName\":\"y\"}", &[&["b"]]);
        let fetcher = fetcher(&config, source, catalog);

        let budget = PageBudget::new(0);
        let first = fetcher
            .sync(&mut config, "us-east-1", &BudgetCheck::new(&budget, Duration::from_secs(1)))
            .await;

        assert_eq!(first.status, KindStatus::Checkpointed);
        assert_eq!(
            config.region_state("us-east-1").unwrap().resources_models,
            Some(vec!["{\"ClusterName\":\"y\"}".to_string()])
        );

        let second = fetcher
            .sync(&mut config, "us-east-1", &BudgetCheck::new(&Unbounded, Duration::from_secs(1)))
            .await;
        assert_eq!(second.status, KindStatus::Drained);
        assert_eq!(second.keys, keys(&["b"]));
    }

    #[tokio::test]
    async fn test_repeated_upsert_leaves_same_catalog_state() {
        let catalog = Arc::new(RecordingCatalog::default());
        let config = config(json!({
            "kind": "AWS::S3::Bucket",
            "port": {"entity": {"mappings": [{
                "identifier": ".Name",
                "blueprint": "bucket",
                "title": ".Name | ascii_upcase",
                "properties": {"size": ".Size", "tags": "[.Tags[].Key]"}
            }]}}
        }));
        let source = MemorySource::default().with_document(
            "logs",
            json!({"Name": "logs", "Size": 3, "Tags": [{"Key": "env"}, {"Key": "team"}]}),
        );
        let fetcher = fetcher(&config, source, catalog.clone());

        let first = fetcher
            .process_item("us-east-1", "logs", ActionType::Upsert)
            .await;
        let once = catalog.stored("bucket", "logs").unwrap();
        let second = fetcher
            .process_item("us-east-1", "logs", ActionType::Upsert)
            .await;

        assert!(!first.failed && !second.failed);
        assert_eq!(first.keys, second.keys);
        assert_eq!(catalog.upserts(), 2);
        assert_eq!(catalog.stored("bucket", "logs").unwrap(), once);
        assert_eq!(once["title"], json!("LOGS"));
        assert_eq!(once["properties"], json!({"size": 3, "tags": ["env", "team"]}));
        assert_eq!(catalog.stored_keys(), keys(&["logs"]));
    }

    #[tokio::test]
    async fn test_delete_item_skips_describe() {
        let catalog = Arc::new(RecordingCatalog::default());
        let config = bucket_config();
        let fetcher = fetcher(&config, MemorySource::default(), catalog.clone());

        let outcome = fetcher
            .process_item("us-east-1", "gone", ActionType::Delete)
            .await;

        assert!(!outcome.failed);
        assert_eq!(catalog.deleted(), vec![EntityKey::new("bucket", "gone")]);
    }
}
