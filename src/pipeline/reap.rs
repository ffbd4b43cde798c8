//! Stale entity deletion.
//!
//! Computes the difference between the entities the catalog holds for this
//! source and the keys produced by a complete run, then deletes the
//! difference.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::models::{EntityKey, EntityRef};
use crate::services::{Catalog, SearchQuery};

/// Counts of one reap pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    /// Entities tagged with this source
    pub found: usize,
    /// Entities not produced by the run
    pub stale: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Entities present in the catalog but absent from `keep`.
pub fn stale_entities(found: Vec<EntityRef>, keep: &BTreeSet<EntityKey>) -> Vec<EntityRef> {
    found
        .into_iter()
        .filter(|entity| !keep.contains(&entity.key()))
        .collect()
}

/// Deletes catalog entities of this source that a run no longer produced.
pub struct StaleEntityReaper {
    catalog: Arc<dyn Catalog>,
    query: SearchQuery,
    workers: usize,
}

impl StaleEntityReaper {
    pub fn new(catalog: Arc<dyn Catalog>, query: SearchQuery, workers: usize) -> Self {
        Self {
            catalog,
            query,
            workers: workers.max(1),
        }
    }

    /// Delete every tagged entity whose key is not in `keep`.
    ///
    /// A failed search deletes nothing. Each deletion is independent.
    pub async fn reap(&self, keep: &BTreeSet<EntityKey>) -> ReapReport {
        let found = match self.catalog.search_entities(&self.query).await {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, "Failed to search catalog entities, skipping deletion");
                return ReapReport::default();
            }
        };

        let mut report = ReapReport {
            found: found.len(),
            ..ReapReport::default()
        };
        let stale = stale_entities(found, keep);
        report.stale = stale.len();
        info!(found = report.found, stale = report.stale, "Deleting stale entities");

        let results: Vec<bool> = stream::iter(stale)
            .map(|entity| async move {
                match self
                    .catalog
                    .delete_entity(&entity.blueprint, &entity.identifier)
                    .await
                {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            blueprint = %entity.blueprint,
                            identifier = %entity.identifier,
                            error = %e,
                            "Failed to delete stale entity"
                        );
                        false
                    }
                }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        report.deleted = results.iter().filter(|ok| **ok).count();
        report.failed = results.len() - report.deleted;
        report
    }
}
