//! In-memory collaborators shared by unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::{Entity, EntityKey, EntityRef};
use crate::pipeline::budget::TimeBudget;
use crate::services::{Catalog, ListPage, ListRequest, ResourceSource, SearchQuery, SourceRegistry};

/// Catalog double recording every call.
///
/// Each write takes a start and a finish tick from one shared clock, so
/// tests can assert which writes overlapped.
#[derive(Default)]
pub struct RecordingCatalog {
    clock: AtomicU64,
    latency: Duration,
    failing: HashSet<String>,
    spans: Mutex<HashMap<String, (u64, u64)>>,
    state: Mutex<BTreeMap<EntityKey, Value>>,
    deleted: Mutex<Vec<EntityKey>>,
    search_results: Vec<EntityRef>,
    search_fails: bool,
    upserts: AtomicUsize,
}

impl RecordingCatalog {
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make writes of these identifiers fail.
    pub fn failing<const N: usize>(mut self, identifiers: [&str; N]) -> Self {
        self.failing.extend(identifiers.iter().map(|id| id.to_string()));
        self
    }

    pub fn with_search_results(mut self, results: &[(&str, &str)]) -> Self {
        self.search_results = results
            .iter()
            .map(|(blueprint, identifier)| EntityRef {
                blueprint: blueprint.to_string(),
                identifier: identifier.to_string(),
            })
            .collect();
        self
    }

    pub fn failing_search(mut self) -> Self {
        self.search_fails = true;
        self
    }

    /// Start and finish tick of the last write of an identifier.
    pub fn span(&self, identifier: &str) -> Option<(u64, u64)> {
        self.spans.lock().unwrap().get(identifier).copied()
    }

    pub fn stored_keys(&self) -> BTreeSet<EntityKey> {
        self.state.lock().unwrap().keys().cloned().collect()
    }

    /// Merged body of a stored entity.
    pub fn stored(&self, blueprint: &str, identifier: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .get(&EntityKey::new(blueprint, identifier))
            .cloned()
    }

    pub fn deleted(&self) -> Vec<EntityKey> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    async fn timed(&self, identifier: &str) -> Result<()> {
        let start = self.clock.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let finish = self.clock.fetch_add(1, Ordering::SeqCst);
        self.spans
            .lock()
            .unwrap()
            .insert(identifier.to_string(), (start, finish));

        if self.failing.contains(identifier) {
            return Err(AppError::validation(format!("rejected {identifier}")));
        }
        Ok(())
    }
}

/// Shallow merge of entity bodies, like the catalog's `merge=true`.
fn merge(target: &mut Value, body: Value) {
    match (target, body) {
        (Value::Object(target), Value::Object(body)) => {
            for (key, value) in body {
                target.insert(key, value);
            }
        }
        (target, body) => *target = body,
    }
}

#[async_trait]
impl Catalog for RecordingCatalog {
    async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        self.timed(&entity.identifier).await?;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let stored = state.entry(entity.key()).or_insert_with(|| json!({}));
        merge(stored, entity.body());
        Ok(())
    }

    async fn delete_entity(&self, blueprint: &str, identifier: &str) -> Result<()> {
        self.timed(identifier).await?;
        let key = EntityKey::new(blueprint, identifier);
        self.state.lock().unwrap().remove(&key);
        self.deleted.lock().unwrap().push(key);
        Ok(())
    }

    async fn search_entities(&self, _query: &SearchQuery) -> Result<Vec<EntityRef>> {
        if self.search_fails {
            return Err(AppError::fetch("search", "catalog unavailable"));
        }
        Ok(self.search_results.clone())
    }
}

type PageKey = (String, Option<String>);

/// Resource source serving fixed pages.
///
/// Cursors are page indices. Documents default to `{"Name": <id>}`.
#[derive(Default)]
pub struct MemorySource {
    pages: HashMap<PageKey, Vec<Vec<String>>>,
    documents: HashMap<String, Value>,
    failing_list: HashSet<String>,
    failing_describe: HashSet<String>,
    lists: AtomicUsize,
}

impl MemorySource {
    pub fn with_pages(self, region: &str, pages: &[&[&str]]) -> Self {
        self.insert_pages((region.to_string(), None), pages)
    }

    pub fn with_model_pages(self, region: &str, model: &str, pages: &[&[&str]]) -> Self {
        self.insert_pages((region.to_string(), Some(model.to_string())), pages)
    }

    fn insert_pages(mut self, key: PageKey, pages: &[&[&str]]) -> Self {
        let pages = pages
            .iter()
            .map(|page| page.iter().map(|id| id.to_string()).collect())
            .collect();
        self.pages.insert(key, pages);
        self
    }

    pub fn with_document(mut self, identifier: &str, document: Value) -> Self {
        self.documents.insert(identifier.to_string(), document);
        self
    }

    pub fn failing_list(mut self, region: &str) -> Self {
        self.failing_list.insert(region.to_string());
        self
    }

    pub fn failing_describe(mut self, identifier: &str) -> Self {
        self.failing_describe.insert(identifier.to_string());
        self
    }

    pub fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceSource for MemorySource {
    async fn list(&self, region: &str, request: &ListRequest<'_>) -> Result<ListPage> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if self.failing_list.contains(region) {
            return Err(AppError::fetch(region, "listing failed"));
        }

        let key = (region.to_string(), request.resource_model.map(str::to_string));
        let Some(pages) = self.pages.get(&key) else {
            return Ok(ListPage::default());
        };
        let index: usize = request.cursor.map_or(0, |c| c.parse().unwrap());
        let next = index + 1;
        Ok(ListPage {
            identifiers: pages.get(index).cloned().unwrap_or_default(),
            next_cursor: (next < pages.len()).then(|| next.to_string()),
        })
    }

    async fn describe(&self, _region: &str, identifier: &str) -> Result<Value> {
        if self.failing_describe.contains(identifier) {
            return Err(AppError::fetch(identifier, "describe failed"));
        }
        Ok(self
            .documents
            .get(identifier)
            .cloned()
            .unwrap_or_else(|| json!({ "Name": identifier })))
    }
}

/// Registry serving one source for every kind.
pub struct StaticRegistry(pub Arc<dyn ResourceSource>);

impl SourceRegistry for StaticRegistry {
    fn source_for(&self, _kind: &str) -> Arc<dyn ResourceSource> {
        self.0.clone()
    }
}

/// Budget with plenty of time for a number of checks, then none.
pub struct PageBudget {
    checks_left: AtomicUsize,
}

impl PageBudget {
    pub fn new(checks: usize) -> Self {
        Self {
            checks_left: AtomicUsize::new(checks),
        }
    }
}

impl TimeBudget for PageBudget {
    fn remaining(&self) -> Duration {
        let left = self
            .checks_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match left {
            Ok(_) => Duration::from_secs(3600),
            Err(_) => Duration::ZERO,
        }
    }
}
