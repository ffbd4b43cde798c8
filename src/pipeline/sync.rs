// src/pipeline/sync.rs

//! Run controller.
//!
//! A run is a sequence of segments. Each segment processes resource kinds in
//! order until either every kind is drained or the time budget runs low, in
//! which case the remaining work is returned as a checkpoint for the hosting
//! runtime to persist and resume. Only a run that drains without a
//! checkpoint and without a sticky failure deletes stale entities.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info};

use super::budget::{BudgetCheck, TimeBudget};
use super::event::ResourceEvent;
use super::fetch::{ItemOutcome, KindStatus, ResourceFetcher};
use super::reap::{ReapReport, StaleEntityReaper};
use crate::error::{AppError, Result};
use crate::models::{ExporterConfig, ResourceConfig, RunState, Settings, SourceIdentity};
use crate::services::{Catalog, EntityDispatcher, SearchQuery, SourceRegistry};

/// Result of one segment.
#[derive(Debug)]
pub enum StepOutcome {
    /// Every kind is drained
    Done(RunState),
    /// The budget ran out with work left
    Checkpoint(RunState),
}

/// Result of a segment including the stale-entity pass.
#[derive(Debug)]
pub enum RunOutcome {
    /// `reap` is `None` when deletion was skipped
    Completed {
        state: RunState,
        reap: Option<ReapReport>,
    },
    Checkpointed(RunState),
}

/// Drives resource kinds through fetch, map and write.
pub struct SyncEngine {
    registry: Arc<dyn SourceRegistry>,
    catalog: Arc<dyn Catalog>,
    settings: Settings,
    identity: SourceIdentity,
}

impl SyncEngine {
    pub fn new(
        registry: Arc<dyn SourceRegistry>,
        catalog: Arc<dyn Catalog>,
        settings: Settings,
        identity: SourceIdentity,
    ) -> Self {
        Self {
            registry,
            catalog,
            settings,
            identity,
        }
    }

    fn dispatcher(&self) -> EntityDispatcher {
        EntityDispatcher::new(self.catalog.clone(), self.settings.concurrency.catalog_workers)
    }

    fn fetcher(&self, config: &ResourceConfig) -> Result<ResourceFetcher> {
        ResourceFetcher::new(
            config,
            self.registry.source_for(&config.kind),
            self.dispatcher(),
            self.settings.concurrency.describe_workers,
        )
    }

    /// Process kinds until drained or out of budget.
    pub async fn step(&self, mut state: RunState, budget: &dyn TimeBudget) -> StepOutcome {
        let check = BudgetCheck::new(budget, self.settings.low_water());

        for index in 0..state.resources.len() {
            let Some(mut config) = state.resources[index].take() else {
                continue;
            };

            let fetcher = match self.fetcher(&config) {
                Ok(fetcher) => fetcher,
                Err(e) => {
                    error!(kind = %config.kind, error = %e, "Invalid mappings, skipping kind");
                    state.mark_skip_delete();
                    continue;
                }
            };

            info!(kind = %config.kind, "Syncing kind");
            let outcome = fetcher.sync(&mut config, &self.identity.region, &check).await;
            info!(
                kind = %config.kind,
                entities = outcome.keys.len(),
                skip_delete = outcome.skip_delete,
                "Kind finished"
            );
            state.absorb(outcome.keys, outcome.skip_delete);

            let checkpointed = outcome.status == KindStatus::Checkpointed;
            if checkpointed {
                state.resources[index] = Some(config);
            }
            if checkpointed || check.exhausted() {
                state.compact();
                if state.has_remaining() {
                    return StepOutcome::Checkpoint(state);
                }
                break;
            }
        }

        state.compact();
        StepOutcome::Done(state)
    }

    /// Run one segment and, when it completes cleanly, reap stale entities.
    pub async fn run(&self, state: RunState, budget: &dyn TimeBudget) -> RunOutcome {
        let state = match self.step(state, budget).await {
            StepOutcome::Checkpoint(state) => return RunOutcome::Checkpointed(state),
            StepOutcome::Done(state) => state,
        };

        if state.skip_delete() {
            info!("Skipping stale entity deletion after partial failures");
            return RunOutcome::Completed { state, reap: None };
        }

        let reap = self.reaper().reap(&state.accumulated).await;
        info!(deleted = reap.deleted, failed = reap.failed, "Stale entity deletion done");
        RunOutcome::Completed {
            state,
            reap: Some(reap),
        }
    }

    fn reaper(&self) -> StaleEntityReaper {
        let query = SearchQuery::datasource(
            &self.settings.catalog.exporter_name,
            &self.identity.user_id(),
        );
        StaleEntityReaper::new(
            self.catalog.clone(),
            query,
            self.settings.concurrency.delete_workers,
        )
    }

    /// Handle one single-resource event message.
    ///
    /// Every resource config of the event's kind is applied.
    pub async fn handle_event(&self, config: &ExporterConfig, message: &Value) -> Result<ItemOutcome> {
        let event = ResourceEvent::resolve(message)?;
        info!(
            kind = %event.resource_type,
            identifier = %event.identifier,
            region = %event.region,
            action = %event.action,
            "Handling resource event"
        );

        let mut resources = config.resources_of_kind(&event.resource_type).peekable();
        if resources.peek().is_none() {
            return Err(AppError::event(format!(
                "Resource config not found for kind: {}",
                event.resource_type
            )));
        }

        let mut outcome = ItemOutcome {
            keys: BTreeSet::new(),
            failed: false,
        };
        for resource in resources {
            let item = self
                .fetcher(resource)?
                .process_item(&event.region, &event.identifier, event.action)
                .await;
            outcome.keys.extend(item.keys);
            outcome.failed |= item.failed;
        }
        Ok(outcome)
    }
}
