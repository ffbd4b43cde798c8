//! Catalog entity records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A catalog record produced from one cloud resource.
///
/// Identity is `(blueprint, identifier)`. Entities are built once per run and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub identifier: String,
    pub blueprint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Value>,

    #[serde(default)]
    pub properties: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relations: Option<BTreeMap<String, Value>>,
}

impl Entity {
    /// Entity carrying only its identity, as used for deletions.
    pub fn reference(blueprint: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            blueprint: blueprint.into(),
            title: None,
            icon: None,
            team: None,
            properties: BTreeMap::new(),
            relations: None,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.blueprint, &self.identifier)
    }

    /// Request body for the catalog: the entity without its blueprint.
    pub fn body(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("blueprint");
        }
        value
    }

    /// Identifiers referenced by this entity's relations.
    ///
    /// List-valued relations are flattened; non-string targets are ignored.
    pub fn relation_targets(&self) -> impl Iterator<Item = &str> {
        self.relations
            .iter()
            .flat_map(|relations| relations.values())
            .flat_map(|target| match target {
                Value::String(id) => vec![id.as_str()],
                Value::Array(ids) => ids.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            })
    }
}

/// `blueprint;identifier` key used to track produced entities across a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(blueprint: &str, identifier: &str) -> Self {
        Self(format!("{blueprint};{identifier}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an entity as returned by a catalog search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub blueprint: String,
    pub identifier: String,
}

impl EntityRef {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.blueprint, &self.identifier)
    }
}
