// src/services/catalog.rs

//! Catalog API client.
//!
//! The client authenticates once and then exposes entity upsert, delete and
//! search. Every call is independent: a failed write is returned to the caller
//! and never poisons the client.

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{CatalogSettings, Entity, EntityRef};
use crate::utils::http::{create_async_client, join_segments};

/// Catalog operations used by the sync engine.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Create or merge an entity.
    async fn upsert_entity(&self, entity: &Entity) -> Result<()>;

    /// Delete an entity and its dependents.
    async fn delete_entity(&self, blueprint: &str, identifier: &str) -> Result<()>;

    /// Identities of all entities matching the query.
    async fn search_entities(&self, query: &SearchQuery) -> Result<Vec<EntityRef>>;
}

/// Client credentials for the catalog API.
#[derive(Clone)]
pub struct CatalogCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for CatalogCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Search body of the catalog API.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery(Value);

impl SearchQuery {
    /// Entities whose datasource carries both the exporter name and the
    /// source identity.
    pub fn datasource(exporter_name: &str, user_id: &str) -> Self {
        Self(json!({
            "combinator": "and",
            "rules": [
                {"property": "$datasource", "operator": "contains", "value": exporter_name},
                {"property": "$datasource", "operator": "contains", "value": user_id},
            ]
        }))
    }

    pub fn body(&self) -> &Value {
        &self.0
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessToken {
    access_token: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    entities: Vec<EntityRef>,
}

/// HTTP implementation of [`Catalog`].
pub struct PortClient {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl PortClient {
    /// Authenticate against the catalog. Failure here aborts the run.
    pub async fn connect(
        credentials: &CatalogCredentials,
        settings: &CatalogSettings,
        user_agent: &str,
    ) -> Result<Self> {
        let base = Url::parse(&settings.api_url)?;
        let client = create_async_client(settings, user_agent)?;

        let url = join_segments(&base, &["auth", "access_token"])?;
        let token = async {
            client
                .post(url)
                .json(&json!({
                    "clientId": credentials.client_id,
                    "clientSecret": credentials.client_secret,
                }))
                .send()
                .await?
                .error_for_status()?
                .json::<AccessToken>()
                .await
        }
        .await
        .map_err(|e| AppError::Authentication(e.to_string()))?
        .access_token;

        info!(api_url = %base, "Authenticated against catalog");
        Ok(Self {
            client,
            base,
            token,
        })
    }

    fn entities_url(&self, blueprint: &str) -> Result<Url> {
        entities_url(&self.base, blueprint)
    }
}

fn entities_url(base: &Url, blueprint: &str) -> Result<Url> {
    let mut url = join_segments(base, &["blueprints", blueprint, "entities"])?;
    url.query_pairs_mut()
        .append_pair("upsert", "true")
        .append_pair("merge", "true");
    Ok(url)
}

fn entity_url(base: &Url, blueprint: &str, identifier: &str) -> Result<Url> {
    let mut url = join_segments(base, &["blueprints", blueprint, "entities", identifier])?;
    url.query_pairs_mut().append_pair("delete_dependents", "true");
    Ok(url)
}

fn search_url(base: &Url) -> Result<Url> {
    let mut url = join_segments(base, &["entities", "search"])?;
    url.query_pairs_mut()
        .append_pair("exclude_calculated_properties", "true")
        .append_pair("include", "blueprint")
        .append_pair("include", "identifier");
    Ok(url)
}

#[async_trait]
impl Catalog for PortClient {
    async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        self.client
            .post(self.entities_url(&entity.blueprint)?)
            .bearer_auth(&self.token)
            .json(&entity.body())
            .send()
            .await?
            .error_for_status()?;
        debug!(
            blueprint = %entity.blueprint,
            identifier = %entity.identifier,
            "Upserted entity"
        );
        Ok(())
    }

    async fn delete_entity(&self, blueprint: &str, identifier: &str) -> Result<()> {
        self.client
            .delete(entity_url(&self.base, blueprint, identifier)?)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        debug!(blueprint, identifier, "Deleted entity");
        Ok(())
    }

    async fn search_entities(&self, query: &SearchQuery) -> Result<Vec<EntityRef>> {
        let response: SearchResponse = self
            .client
            .post(search_url(&self.base)?)
            .bearer_auth(&self.token)
            .json(query.body())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://api.getport.io/v1").unwrap()
    }

    #[test]
    fn test_entities_url() {
        let url = entities_url(&base(), "aws bucket").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.getport.io/v1/blueprints/aws%20bucket/entities?upsert=true&merge=true"
        );
    }

    #[test]
    fn test_entity_url_encodes_identifier() {
        let url = entity_url(&base(), "stack", "arn:aws:cloudformation:stack/a").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.getport.io/v1/blueprints/stack/entities/arn:aws:cloudformation:stack%2Fa?delete_dependents=true"
        );
    }

    #[test]
    fn test_search_url_and_body() {
        let url = search_url(&base()).unwrap();
        assert_eq!(
            url.query(),
            Some("exclude_calculated_properties=true&include=blueprint&include=identifier")
        );

        let query = SearchQuery::datasource("port-aws-exporter", "accountid/1 region/r");
        assert_eq!(query.body()["combinator"], "and");
        assert_eq!(query.body()["rules"][1]["value"], "accountid/1 region/r");
    }

    #[test]
    fn test_search_response_parsing() {
        let response: SearchResponse = serde_json::from_str(
            r#"{"ok": true, "entities": [{"blueprint": "bucket", "identifier": "logs"}]}"#,
        )
        .unwrap();
        assert_eq!(response.entities[0].key().as_str(), "bucket;logs");
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let credentials = CatalogCredentials {
            client_id: "id".into(),
            client_secret: "hunter2".into(),
        };
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("id"));
        assert!(!rendered.contains("hunter2"));
    }
}
