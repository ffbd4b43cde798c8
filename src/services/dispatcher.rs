// src/services/dispatcher.rs

//! Dependency-aware entity writes.
//!
//! Entities arrive in production order and are grouped into batches that are
//! written concurrently. An entity whose relation points at an identifier
//! already in the current batch closes that batch: the batch is flushed, the
//! dependent entity is written on its own, and a fresh batch starts. A
//! relation target is therefore always written before its dependent.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::{StreamExt, stream};
use tracing::warn;

use super::catalog::Catalog;
use crate::models::{ActionType, Entity, EntityKey};

/// Writes entities through a [`Catalog`] with a bounded worker pool.
#[derive(Clone)]
pub struct EntityDispatcher {
    catalog: Arc<dyn Catalog>,
    workers: usize,
}

impl EntityDispatcher {
    pub fn new(catalog: Arc<dyn Catalog>, workers: usize) -> Self {
        Self {
            catalog,
            workers: workers.max(1),
        }
    }

    /// Write all entities and return their keys.
    ///
    /// A failed write is logged and its key is still returned, so it never
    /// makes the entity look stale to the reaper.
    pub async fn dispatch(&self, entities: Vec<Entity>, action: ActionType) -> BTreeSet<EntityKey> {
        let mut keys = BTreeSet::new();
        let mut batch: Vec<Entity> = Vec::new();
        let mut batch_ids: HashSet<String> = HashSet::new();

        for entity in entities {
            let depends_on_batch = entity
                .relation_targets()
                .any(|target| batch_ids.contains(target));

            if depends_on_batch {
                batch_ids.clear();
                keys.extend(self.flush(std::mem::take(&mut batch), action).await);
                keys.insert(self.write(entity, action).await);
            } else {
                batch_ids.insert(entity.identifier.clone());
                batch.push(entity);
            }
        }

        keys.extend(self.flush(batch, action).await);
        keys
    }

    async fn flush(&self, batch: Vec<Entity>, action: ActionType) -> Vec<EntityKey> {
        if batch.is_empty() {
            return Vec::new();
        }
        stream::iter(batch)
            .map(|entity| self.write(entity, action))
            .buffer_unordered(self.workers)
            .collect()
            .await
    }

    async fn write(&self, entity: Entity, action: ActionType) -> EntityKey {
        let result = match action {
            ActionType::Upsert => self.catalog.upsert_entity(&entity).await,
            ActionType::Delete => {
                self.catalog
                    .delete_entity(&entity.blueprint, &entity.identifier)
                    .await
            }
        };
        if let Err(e) = result {
            warn!(
                %action,
                blueprint = %entity.blueprint,
                identifier = %entity.identifier,
                error = %e,
                "Failed to write entity"
            );
        }
        entity.key()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::testing::RecordingCatalog;

    fn entity(identifier: &str, relates_to: Option<&str>) -> Entity {
        let mut entity = Entity::reference("svc", identifier);
        if let Some(target) = relates_to {
            entity.relations = Some(BTreeMap::from([("dep".to_string(), json!(target))]));
        }
        entity
    }

    #[tokio::test]
    async fn test_dependent_waits_for_its_target() {
        let catalog = Arc::new(RecordingCatalog::default().with_latency(Duration::from_millis(20)));
        let dispatcher = EntityDispatcher::new(catalog.clone(), 4);

        let entities = vec![
            entity("a", None),
            entity("x", None),
            entity("b", Some("a")),
            entity("c", None),
        ];
        let keys = dispatcher.dispatch(entities, ActionType::Upsert).await;

        assert_eq!(keys.len(), 4);
        let a = catalog.span("a").unwrap();
        let b = catalog.span("b").unwrap();
        assert!(a.1 < b.0, "a finished at {} but b started at {}", a.1, b.0);
        let c = catalog.span("c").unwrap();
        assert!(b.1 < c.0);
    }

    #[tokio::test]
    async fn test_independent_entities_share_a_batch() {
        let catalog = Arc::new(RecordingCatalog::default().with_latency(Duration::from_millis(20)));
        let dispatcher = EntityDispatcher::new(catalog.clone(), 4);

        let entities = vec![entity("a", None), entity("b", Some("elsewhere")), entity("c", None)];
        dispatcher.dispatch(entities, ActionType::Upsert).await;

        let starts: Vec<u64> = ["a", "b", "c"]
            .iter()
            .map(|id| catalog.span(id).unwrap().0)
            .collect();
        let first_finish = ["a", "b", "c"]
            .iter()
            .map(|id| catalog.span(id).unwrap().1)
            .min()
            .unwrap();
        assert!(starts.iter().all(|start| *start < first_finish));
    }

    #[tokio::test]
    async fn test_list_relations_are_checked() {
        let catalog = Arc::new(RecordingCatalog::default().with_latency(Duration::from_millis(10)));
        let dispatcher = EntityDispatcher::new(catalog.clone(), 4);

        let mut dependent = entity("b", None);
        dependent.relations = Some(BTreeMap::from([("deps".to_string(), json!(["z", "a"]))]));
        dispatcher
            .dispatch(vec![entity("a", None), dependent], ActionType::Upsert)
            .await;

        assert!(catalog.span("a").unwrap().1 < catalog.span("b").unwrap().0);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_block_siblings() {
        let catalog = Arc::new(RecordingCatalog::default().failing(["b"]));
        let dispatcher = EntityDispatcher::new(catalog.clone(), 2);

        let keys = dispatcher
            .dispatch(
                vec![entity("a", None), entity("b", None), entity("c", None)],
                ActionType::Upsert,
            )
            .await;

        assert_eq!(keys.len(), 3);
        let stored = catalog.stored_keys();
        assert!(stored.contains(&EntityKey::new("svc", "a")));
        assert!(stored.contains(&EntityKey::new("svc", "c")));
        assert!(!stored.contains(&EntityKey::new("svc", "b")));
    }

    #[tokio::test]
    async fn test_delete_action_deletes() {
        let catalog = Arc::new(RecordingCatalog::default());
        let dispatcher = EntityDispatcher::new(catalog.clone(), 2);

        dispatcher
            .dispatch(vec![entity("a", None)], ActionType::Delete)
            .await;

        assert_eq!(catalog.deleted(), vec![EntityKey::new("svc", "a")]);
    }
}
