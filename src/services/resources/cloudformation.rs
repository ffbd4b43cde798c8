//! CloudFormation stacks, enriched with resources and template.

use async_trait::async_trait;
use aws_config::{Region, SdkConfig};
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::types::{
    Capability, Output, Parameter, ResourceStatus, Stack, StackResource, StackStatus,
    StackSummary, Tag, TemplateStage,
};
use serde_json::{Map, Value};

use super::json::{ToJson, enum_to_json, json_object};
use super::{ListPage, ListRequest, RegionalClients, ResourceSource};
use crate::error::{AppError, Result};

const CONSOLE_URL: &str = "https://console.aws.amazon.com/go/view?arn=";

enum_to_json!(Capability, ResourceStatus, StackStatus);

impl ToJson for Parameter {
    fn to_json(&self) -> Value {
        json_object! {
            "ParameterKey" => self.parameter_key(),
            "ParameterValue" => self.parameter_value(),
            "UsePreviousValue" => self.use_previous_value(),
            "ResolvedValue" => self.resolved_value(),
        }
    }
}

impl ToJson for Output {
    fn to_json(&self) -> Value {
        json_object! {
            "OutputKey" => self.output_key(),
            "OutputValue" => self.output_value(),
            "Description" => self.description(),
            "ExportName" => self.export_name(),
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

impl ToJson for StackResource {
    fn to_json(&self) -> Value {
        json_object! {
            "StackName" => self.stack_name(),
            "StackId" => self.stack_id(),
            "LogicalResourceId" => self.logical_resource_id(),
            "PhysicalResourceId" => self.physical_resource_id(),
            "ResourceType" => self.resource_type(),
            "Timestamp" => self.timestamp(),
            "ResourceStatus" => self.resource_status(),
            "ResourceStatusReason" => self.resource_status_reason(),
            "Description" => self.description(),
        }
    }
}

impl ToJson for Stack {
    fn to_json(&self) -> Value {
        json_object! {
            "StackId" => self.stack_id(),
            "StackName" => self.stack_name(),
            "ChangeSetId" => self.change_set_id(),
            "Description" => self.description(),
            "Parameters" => self.parameters(),
            "CreationTime" => self.creation_time(),
            "DeletionTime" => self.deletion_time(),
            "LastUpdatedTime" => self.last_updated_time(),
            "StackStatus" => self.stack_status(),
            "StackStatusReason" => self.stack_status_reason(),
            "DisableRollback" => self.disable_rollback(),
            "NotificationARNs" => self.notification_arns(),
            "TimeoutInMinutes" => self.timeout_in_minutes(),
            "Capabilities" => self.capabilities(),
            "Outputs" => self.outputs(),
            "RoleARN" => self.role_arn(),
            "Tags" => self.tags(),
            "EnableTerminationProtection" => self.enable_termination_protection(),
            "ParentId" => self.parent_id(),
            "RootId" => self.root_id(),
        }
    }
}

fn client(sdk: &SdkConfig, region: &str) -> Client {
    let config = aws_sdk_cloudformation::config::Builder::from(sdk)
        .region(Region::new(region.to_string()))
        .build();
    Client::from_conf(config)
}

/// Stack status filter stored with the region state.
fn status_filter(options: &Map<String, Value>) -> Option<Vec<StackStatus>> {
    let statuses = options.get("stack_status_filter")?.as_array()?;
    let statuses: Vec<StackStatus> = statuses
        .iter()
        .filter_map(Value::as_str)
        .map(StackStatus::from)
        .collect();
    (!statuses.is_empty()).then_some(statuses)
}

fn is_deleted(summary: &StackSummary) -> bool {
    summary.stack_status().to_json() == StackStatus::DeleteComplete.as_str()
}

/// Lists stacks and describes each with its resources and original template.
pub struct CloudFormationSource {
    clients: RegionalClients<Client>,
}

impl CloudFormationSource {
    pub fn new(sdk: &SdkConfig) -> Self {
        Self {
            clients: RegionalClients::new(sdk.clone(), client),
        }
    }
}

#[async_trait]
impl ResourceSource for CloudFormationSource {
    async fn list(&self, region: &str, request: &ListRequest<'_>) -> Result<ListPage> {
        let output = self
            .clients
            .get(region)
            .list_stacks()
            .set_stack_status_filter(status_filter(request.region_options))
            .set_next_token(request.cursor.map(str::to_string))
            .send()
            .await
            .map_err(|e| AppError::aws("cloudformation", e))?;

        Ok(ListPage {
            identifiers: output
                .stack_summaries()
                .iter()
                .filter(|s| !is_deleted(s))
                .filter_map(|s| s.stack_id().map(str::to_string))
                .collect(),
            next_cursor: output.next_token().map(str::to_string),
        })
    }

    async fn describe(&self, region: &str, identifier: &str) -> Result<Value> {
        let client = self.clients.get(region);

        let stacks = client
            .describe_stacks()
            .stack_name(identifier)
            .send()
            .await
            .map_err(|e| AppError::aws("cloudformation", e))?;
        let stack = stacks
            .stacks()
            .first()
            .ok_or_else(|| AppError::fetch(identifier, "stack not found"))?;

        let resources = client
            .describe_stack_resources()
            .stack_name(identifier)
            .send()
            .await
            .map_err(|e| AppError::aws("cloudformation", e))?;

        let template = client
            .get_template()
            .stack_name(identifier)
            .template_stage(TemplateStage::Original)
            .send()
            .await
            .map_err(|e| AppError::aws("cloudformation", e))?;

        let mut document = stack.to_json();
        if let Value::Object(map) = &mut document {
            map.insert("StackResources".into(), resources.stack_resources().to_json());
            let stack_id = stack.stack_id().unwrap_or(identifier);
            map.insert("Url".into(), Value::String(format!("{CONSOLE_URL}{stack_id}")));
            map.insert("TemplateBody".into(), template.template_body().to_json());
        }
        Ok(document)
    }
}
