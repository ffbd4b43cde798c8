//! Exporter document structures.
//!
//! The exporter document lists every resource kind to export together with
//! its selector and entity mappings. The same document doubles as the
//! checkpoint snapshot: per-region cursors and the accumulated entity keys are
//! written back into it when a run is cut short.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entity::EntityKey;
use crate::error::{AppError, Result};

/// Root exporter document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Resource kinds still to be exported
    pub resources: Vec<ResourceConfig>,

    /// Catalog client id, accepted on input only
    #[serde(default, skip_serializing)]
    pub port_client_id: Option<String>,

    /// Catalog client secret, accepted on input only
    #[serde(default, skip_serializing)]
    pub port_client_secret: Option<String>,

    /// Catalog API base URL override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_api_url: Option<String>,

    /// Keys produced by earlier segments of a checkpointed run
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub aws_entities: BTreeSet<EntityKey>,

    /// Sticky flag carried over from earlier segments
    #[serde(default)]
    pub skip_delete: bool,
}

impl ExporterConfig {
    /// Load an exporter document from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read(path)?;
        Self::from_slice(&content)
    }

    /// Parse an exporter document from JSON bytes.
    ///
    /// A document without `resources` is rejected rather than read as an
    /// empty run, which would reap every entity of this source.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let document: Value = serde_json::from_slice(bytes)?;
        if document.get("resources").is_none() {
            return Err(AppError::config("Exporter document must include 'resources'"));
        }
        let config: Self = serde_json::from_value(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural requirements.
    pub fn validate(&self) -> Result<()> {
        for (index, resource) in self.resources.iter().enumerate() {
            if resource.kind.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "resources[{index}].kind is empty"
                )));
            }
        }
        Ok(())
    }

    /// Resource configs of the given kind.
    pub fn resources_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a ResourceConfig> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }
}

/// One resource kind to export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Cloud resource type, e.g. `AWS::S3::Bucket`
    pub kind: String,

    #[serde(default)]
    pub selector: Selector,

    #[serde(default)]
    pub port: PortSection,
}

impl ResourceConfig {
    /// Regions to walk, falling back to the given default region.
    pub fn regions(&self, default_region: &str) -> Vec<String> {
        match &self.selector.aws.regions {
            Some(regions) => regions.clone(),
            None => vec![default_region.to_string()],
        }
    }

    /// Make the region list explicit so a checkpoint can shrink it.
    pub fn pin_regions(&mut self, default_region: &str) {
        if self.selector.aws.regions.is_none() {
            self.selector.aws.regions = Some(vec![default_region.to_string()]);
        }
    }

    /// Drop a fully drained region together with its pagination state.
    pub fn remove_region(&mut self, region: &str) {
        if let Some(regions) = &mut self.selector.aws.regions {
            regions.retain(|r| r != region);
        }
        self.selector.aws.regions_config.remove(region);
    }

    pub fn region_state(&self, region: &str) -> Option<&RegionState> {
        self.selector.aws.regions_config.get(region)
    }

    pub fn region_state_mut(&mut self, region: &str) -> &mut RegionState {
        self.selector
            .aws
            .regions_config
            .entry(region.to_string())
            .or_default()
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.port.entity.mappings
    }

    /// Whether every configured region has been drained.
    pub fn is_drained(&self) -> bool {
        matches!(&self.selector.aws.regions, Some(regions) if regions.is_empty())
    }
}

/// Gate and listing parameters for a resource kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    /// Expression that must evaluate truthy for a resource to be exported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(default)]
    pub aws: AwsSelector,
}

/// Cloud-side listing parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwsSelector {
    /// Regions still to walk; absent means the run's default region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<String>>,

    /// Per-region pagination state
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub regions_config: BTreeMap<String, RegionState>,

    /// Extra parameters forwarded to the listing call
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub list_parameters: Map<String, Value>,
}

/// Resumable listing position inside one region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionState {
    /// Pagination cursor of the listing in progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,

    /// Sub-listings not yet drained, for hierarchical sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_models: Option<Vec<String>>,

    /// Source-specific options such as `stack_status_filter`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Catalog side of a resource config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortSection {
    #[serde(default)]
    pub entity: EntitySection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySection {
    #[serde(default)]
    pub mappings: Vec<Mapping>,
}

/// Declarative rule turning a resource document into an entity.
///
/// Every field except `blueprint` is an expression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,

    /// Literal blueprint name; surrounding double quotes are ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint: Option<String>,

    #[serde(
        default,
        rename = "itemsToParse",
        skip_serializing_if = "Option::is_none"
    )]
    pub items_to_parse: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relations: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "resources": [{
                "kind": "AWS::CloudFormation::Stack",
                "selector": {
                    "query": "true",
                    "aws": {
                        "regions": ["us-east-1", "eu-west-1"],
                        "regions_config": {
                            "us-east-1": {
                                "next_token": "abc",
                                "stack_status_filter": ["CREATE_COMPLETE"]
                            }
                        }
                    }
                },
                "port": {"entity": {"mappings": [{
                    "identifier": ".StackId",
                    "blueprint": "\"cloudformationStack\"",
                    "itemsToParse": ".StackResources",
                    "properties": {"status": ".StackStatus"}
                }]}}
            }],
            "port_client_id": "id",
            "port_client_secret": "secret",
            "aws_entities": ["stack;a"]
        })
    }

    #[test]
    fn test_parses_region_scoped_layout() {
        let config: ExporterConfig = serde_json::from_value(sample()).unwrap();
        let resource = &config.resources[0];

        assert_eq!(resource.selector.query.as_deref(), Some("true"));
        let state = resource.region_state("us-east-1").unwrap();
        assert_eq!(state.next_token.as_deref(), Some("abc"));
        assert_eq!(
            state.extra.get("stack_status_filter"),
            Some(&json!(["CREATE_COMPLETE"]))
        );
        assert_eq!(
            resource.mappings()[0].items_to_parse.as_deref(),
            Some(".StackResources")
        );
        assert!(config.aws_entities.contains(&EntityKey::new("stack", "a")));
    }

    #[test]
    fn test_credentials_are_never_serialized() {
        let config: ExporterConfig = serde_json::from_value(sample()).unwrap();
        let out = serde_json::to_value(&config).unwrap();

        assert!(out.get("port_client_id").is_none());
        assert!(out.get("port_client_secret").is_none());
        assert_eq!(
            out["resources"][0]["selector"]["aws"]["regions_config"]["us-east-1"]["stack_status_filter"],
            json!(["CREATE_COMPLETE"])
        );
    }

    #[test]
    fn test_region_bookkeeping() {
        let mut resource = ResourceConfig {
            kind: "AWS::S3::Bucket".into(),
            selector: Selector::default(),
            port: PortSection::default(),
        };
        assert_eq!(resource.regions("us-east-1"), vec!["us-east-1"]);
        assert!(!resource.is_drained());

        resource.pin_regions("us-east-1");
        resource.region_state_mut("us-east-1").next_token = Some("t".into());
        resource.remove_region("us-east-1");

        assert!(resource.is_drained());
        assert!(resource.region_state("us-east-1").is_none());
    }

    #[test]
    fn test_missing_resources_is_fatal() {
        let err = ExporterConfig::from_slice(br#"{"resource": [{"kind": "AWS::S3::Bucket"}]}"#)
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("resources"));

        let empty = ExporterConfig::from_slice(br#"{"resources": []}"#).unwrap();
        assert!(empty.resources.is_empty());
    }

    #[test]
    fn test_rejects_empty_kind() {
        let err = ExporterConfig::from_slice(br#"{"resources": [{"kind": " "}]}"#).unwrap_err();
        assert!(err.to_string().contains("resources[0].kind"));
    }
}
