//! ElastiCache clusters, enriched with their tags.

use async_trait::async_trait;
use aws_config::{Region, SdkConfig};
use aws_sdk_elasticache::Client;
use aws_sdk_elasticache::types::{
    CacheCluster, CacheNode, CacheParameterGroupStatus, Endpoint, SecurityGroupMembership, Tag,
};
use serde_json::{Map, Value};

use super::json::{ToJson, json_object};
use super::{ListPage, ListRequest, RegionalClients, ResourceSource, int_param};
use crate::error::{AppError, Result};

impl ToJson for Endpoint {
    fn to_json(&self) -> Value {
        json_object! {
            "Address" => self.address(),
            "Port" => self.port(),
        }
    }
}

impl ToJson for CacheNode {
    fn to_json(&self) -> Value {
        json_object! {
            "CacheNodeId" => self.cache_node_id(),
            "CacheNodeStatus" => self.cache_node_status(),
            "CacheNodeCreateTime" => self.cache_node_create_time(),
            "Endpoint" => self.endpoint(),
            "ParameterGroupStatus" => self.parameter_group_status(),
            "CustomerAvailabilityZone" => self.customer_availability_zone(),
        }
    }
}

impl ToJson for SecurityGroupMembership {
    fn to_json(&self) -> Value {
        json_object! {
            "SecurityGroupId" => self.security_group_id(),
            "Status" => self.status(),
        }
    }
}

impl ToJson for CacheParameterGroupStatus {
    fn to_json(&self) -> Value {
        json_object! {
            "CacheParameterGroupName" => self.cache_parameter_group_name(),
            "ParameterApplyStatus" => self.parameter_apply_status(),
            "CacheNodeIdsToReboot" => self.cache_node_ids_to_reboot(),
        }
    }
}

impl ToJson for Tag {
    fn to_json(&self) -> Value {
        json_object! {
            "Key" => self.key(),
            "Value" => self.value(),
        }
    }
}

impl ToJson for CacheCluster {
    fn to_json(&self) -> Value {
        json_object! {
            "CacheClusterId" => self.cache_cluster_id(),
            "ConfigurationEndpoint" => self.configuration_endpoint(),
            "ClientDownloadLandingPage" => self.client_download_landing_page(),
            "CacheNodeType" => self.cache_node_type(),
            "Engine" => self.engine(),
            "EngineVersion" => self.engine_version(),
            "CacheClusterStatus" => self.cache_cluster_status(),
            "NumCacheNodes" => self.num_cache_nodes(),
            "PreferredAvailabilityZone" => self.preferred_availability_zone(),
            "CacheClusterCreateTime" => self.cache_cluster_create_time(),
            "PreferredMaintenanceWindow" => self.preferred_maintenance_window(),
            "CacheParameterGroup" => self.cache_parameter_group(),
            "CacheSubnetGroupName" => self.cache_subnet_group_name(),
            "CacheNodes" => self.cache_nodes(),
            "AutoMinorVersionUpgrade" => self.auto_minor_version_upgrade(),
            "SecurityGroups" => self.security_groups(),
            "ReplicationGroupId" => self.replication_group_id(),
            "SnapshotRetentionLimit" => self.snapshot_retention_limit(),
            "SnapshotWindow" => self.snapshot_window(),
            "AuthTokenEnabled" => self.auth_token_enabled(),
            "TransitEncryptionEnabled" => self.transit_encryption_enabled(),
            "AtRestEncryptionEnabled" => self.at_rest_encryption_enabled(),
            "ARN" => self.arn(),
        }
    }
}

fn client(sdk: &SdkConfig, region: &str) -> Client {
    let config = aws_sdk_elasticache::config::Builder::from(sdk)
        .region(Region::new(region.to_string()))
        .build();
    Client::from_conf(config)
}

fn bool_param(parameters: &Map<String, Value>, name: &str) -> Option<bool> {
    parameters.get(name).and_then(Value::as_bool)
}

/// Lists cache clusters with marker pagination and attaches their tags.
pub struct ElastiCacheSource {
    clients: RegionalClients<Client>,
}

impl ElastiCacheSource {
    pub fn new(sdk: &SdkConfig) -> Self {
        Self {
            clients: RegionalClients::new(sdk.clone(), client),
        }
    }
}

#[async_trait]
impl ResourceSource for ElastiCacheSource {
    async fn list(&self, region: &str, request: &ListRequest<'_>) -> Result<ListPage> {
        let output = self
            .clients
            .get(region)
            .describe_cache_clusters()
            .set_max_records(int_param(request.parameters, "MaxRecords"))
            .set_show_cache_clusters_not_in_replication_groups(bool_param(
                request.parameters,
                "ShowCacheClustersNotInReplicationGroups",
            ))
            .set_marker(request.cursor.map(str::to_string))
            .send()
            .await
            .map_err(|e| AppError::aws("elasticache", e))?;

        Ok(ListPage {
            identifiers: output
                .cache_clusters()
                .iter()
                .filter_map(|c| c.cache_cluster_id().map(str::to_string))
                .collect(),
            next_cursor: output.marker().map(str::to_string),
        })
    }

    async fn describe(&self, region: &str, identifier: &str) -> Result<Value> {
        let client = self.clients.get(region);

        let output = client
            .describe_cache_clusters()
            .cache_cluster_id(identifier)
            .show_cache_node_info(true)
            .send()
            .await
            .map_err(|e| AppError::aws("elasticache", e))?;
        let cluster = output
            .cache_clusters()
            .first()
            .ok_or_else(|| AppError::fetch(identifier, "cache cluster not found"))?;

        let mut document = cluster.to_json();
        if let (Some(arn), Value::Object(map)) = (cluster.arn(), &mut document) {
            let tags = client
                .list_tags_for_resource()
                .resource_name(arn)
                .send()
                .await
                .map_err(|e| AppError::aws("elasticache", e))?;
            map.insert("Tags".into(), tags.tag_list().to_json());
        }
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cluster_rendering() {
        let cluster = CacheCluster::builder()
            .cache_cluster_id("sessions-001")
            .engine("redis")
            .num_cache_nodes(1)
            .configuration_endpoint(Endpoint::builder().address("sessions.cache").port(6379).build())
            .arn("arn:aws:elasticache:us-east-1:1:cluster:sessions-001")
            .build();

        let value = cluster.to_json();
        assert_eq!(value["CacheClusterId"], "sessions-001");
        assert_eq!(
            value["ConfigurationEndpoint"],
            json!({"Address": "sessions.cache", "Port": 6379})
        );
        assert_eq!(value["NumCacheNodes"], 1);
        assert!(value.get("Tags").is_none());
    }
}
