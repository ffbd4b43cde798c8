//! Generic source backed by the Cloud Control API.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{Region, SdkConfig};
use aws_sdk_cloudcontrol::Client;
use serde_json::Value;
use tracing::debug;

use super::{ListPage, ListRequest, RegionalClients, ResourceSource, int_param};
use crate::error::{AppError, Result};

pub(super) fn client(sdk: &SdkConfig, region: &str) -> Client {
    let config = aws_sdk_cloudcontrol::config::Builder::from(sdk)
        .region(Region::new(region.to_string()))
        .build();
    Client::from_conf(config)
}

/// Lists and reads any resource type through Cloud Control.
pub struct CloudControlSource {
    kind: String,
    clients: Arc<RegionalClients<Client>>,
    workers: usize,
}

impl CloudControlSource {
    pub(crate) fn new(kind: &str, clients: Arc<RegionalClients<Client>>, workers: usize) -> Self {
        Self {
            kind: kind.to_string(),
            clients,
            workers,
        }
    }
}

#[async_trait]
impl ResourceSource for CloudControlSource {
    async fn list(&self, region: &str, request: &ListRequest<'_>) -> Result<ListPage> {
        debug!(
            kind = %self.kind,
            region,
            resource_model = request.resource_model,
            "Listing resources"
        );
        let output = self
            .clients
            .get(region)
            .list_resources()
            .type_name(&self.kind)
            .set_resource_model(request.resource_model.map(str::to_string))
            .set_next_token(request.cursor.map(str::to_string))
            .set_max_results(int_param(request.parameters, "MaxResults"))
            .send()
            .await
            .map_err(|e| AppError::aws("cloudcontrol", e))?;

        Ok(ListPage {
            identifiers: output
                .resource_descriptions()
                .iter()
                .filter_map(|d| d.identifier().map(str::to_string))
                .collect(),
            next_cursor: output.next_token().map(str::to_string),
        })
    }

    async fn describe(&self, region: &str, identifier: &str) -> Result<Value> {
        let output = self
            .clients
            .get(region)
            .get_resource()
            .type_name(&self.kind)
            .identifier(identifier)
            .send()
            .await
            .map_err(|e| AppError::aws("cloudcontrol", e))?;

        let properties = output
            .resource_description()
            .and_then(|d| d.properties())
            .ok_or_else(|| {
                AppError::fetch(
                    format!("{} {identifier}", self.kind),
                    "resource description has no properties",
                )
            })?;
        Ok(serde_json::from_str(properties)?)
    }

    fn describe_workers(&self) -> Option<usize> {
        Some(self.workers)
    }
}
