//! State of one run segment.

use std::collections::BTreeSet;

use super::config::{ExporterConfig, ResourceConfig};
use super::entity::EntityKey;

/// Progress of a run, carried across checkpoints.
///
/// `accumulated` only grows and `skip_delete` never goes back to `false`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    /// Kinds still to process; `None` marks a kind drained in this segment
    pub resources: Vec<Option<ResourceConfig>>,
    pub accumulated: BTreeSet<EntityKey>,
    skip_delete: bool,
}

impl RunState {
    /// Resume from an exporter document or checkpoint snapshot.
    pub fn from_config(config: &ExporterConfig) -> Self {
        Self {
            resources: config.resources.iter().cloned().map(Some).collect(),
            accumulated: config.aws_entities.clone(),
            skip_delete: config.skip_delete,
        }
    }

    /// Freeze the remaining work into a snapshot document.
    ///
    /// Credentials are never copied; the API URL is kept so a resumed run
    /// talks to the same catalog.
    pub fn to_snapshot(&self, base: &ExporterConfig) -> ExporterConfig {
        ExporterConfig {
            resources: self.resources.iter().flatten().cloned().collect(),
            port_client_id: None,
            port_client_secret: None,
            port_api_url: base.port_api_url.clone(),
            aws_entities: self.accumulated.clone(),
            skip_delete: self.skip_delete,
        }
    }

    pub fn skip_delete(&self) -> bool {
        self.skip_delete
    }

    pub fn mark_skip_delete(&mut self) {
        self.skip_delete = true;
    }

    /// Merge a worker's result into the run.
    pub fn absorb(&mut self, keys: impl IntoIterator<Item = EntityKey>, skip_delete: bool) {
        self.accumulated.extend(keys);
        if skip_delete {
            self.skip_delete = true;
        }
    }

    /// Drop drained kinds.
    pub fn compact(&mut self) {
        self.resources.retain(Option::is_some);
    }

    pub fn has_remaining(&self) -> bool {
        self.resources.iter().any(Option::is_some)
    }
}
