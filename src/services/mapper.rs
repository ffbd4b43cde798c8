// src/services/mapper.rs

//! Turns resource documents into catalog entities.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{AppError, Result};
use crate::expr::{Expression, is_falsy};
use crate::models::{ActionType, Entity, Mapping, ResourceConfig};

/// Expression used when a mapping declares no identifier.
const MISSING_IDENTIFIER: &str = "null";

/// Entities produced for one resource plus the mappings that failed.
#[derive(Debug, Default)]
pub struct MappedEntities {
    pub entities: Vec<Entity>,
    pub failures: Vec<AppError>,
}

impl MappedEntities {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Compiled selector and mappings of one resource kind.
#[derive(Debug, Clone)]
pub struct EntityMapper {
    selector: Option<Expression>,
    mappings: Vec<CompiledMapping>,
}

#[derive(Debug, Clone)]
struct CompiledMapping {
    /// Rendered mapping for error messages
    display: String,
    identifier: Expression,
    title: Option<Expression>,
    icon: Option<Expression>,
    team: Option<Expression>,
    blueprint: Option<String>,
    items_to_parse: Option<Expression>,
    properties: Vec<(String, Expression)>,
    relations: Vec<(String, Expression)>,
}

fn compile_optional(source: Option<&String>) -> Result<Option<Expression>> {
    source.map(|s| Expression::compile(s)).transpose()
}

fn compile_fields(fields: &BTreeMap<String, String>) -> Result<Vec<(String, Expression)>> {
    fields
        .iter()
        .map(|(key, source)| Ok((key.clone(), Expression::compile(source)?)))
        .collect()
}

impl CompiledMapping {
    fn compile(mapping: &Mapping) -> Result<Self> {
        let identifier = mapping.identifier.as_deref().unwrap_or(MISSING_IDENTIFIER);
        Ok(Self {
            display: serde_json::to_string(mapping)?,
            identifier: Expression::compile(identifier)?,
            title: compile_optional(mapping.title.as_ref())?,
            icon: compile_optional(mapping.icon.as_ref())?,
            team: compile_optional(mapping.team.as_ref())?,
            blueprint: mapping
                .blueprint
                .as_deref()
                .map(|b| b.trim().trim_matches('"').to_string())
                .filter(|b| !b.is_empty()),
            items_to_parse: compile_optional(mapping.items_to_parse.as_ref())?,
            properties: compile_fields(&mapping.properties)?,
            relations: compile_fields(&mapping.relations)?,
        })
    }

    fn blueprint(&self) -> Result<&str> {
        self.blueprint
            .as_deref()
            .ok_or_else(|| AppError::missing_field("blueprint", &self.display))
    }

    fn identifier(&self, value: Value) -> Result<String> {
        if is_falsy(&value) {
            return Err(AppError::missing_field("identifier", &self.display));
        }
        match value {
            Value::String(id) => Ok(id),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(AppError::validation(format!(
                "Entity identifier must be a string, got {other} for mapping: {}",
                self.display
            ))),
        }
    }

    fn optional(expr: &Option<Expression>, document: &Value) -> Result<Option<Value>> {
        match expr {
            Some(expr) => Ok(Some(expr.evaluate_first(document)?).filter(|v| !v.is_null())),
            None => Ok(None),
        }
    }

    fn fields(
        fields: &[(String, Expression)],
        document: &Value,
    ) -> Result<BTreeMap<String, Value>> {
        fields
            .iter()
            .map(|(key, expr)| Ok((key.clone(), expr.evaluate_first(document)?)))
            .collect()
    }

    fn build(&self, document: &Value) -> Result<Entity> {
        let identifier = self.identifier(self.identifier.evaluate_first(document)?)?;
        let blueprint = self.blueprint()?.to_string();
        let relations = Self::fields(&self.relations, document)?;

        Ok(Entity {
            identifier,
            blueprint,
            title: Self::optional(&self.title, document)?,
            icon: Self::optional(&self.icon, document)?,
            team: Self::optional(&self.team, document)?,
            properties: Self::fields(&self.properties, document)?,
            relations: (!relations.is_empty()).then_some(relations),
        })
    }

    fn upsert(&self, resource: &Value) -> Result<Vec<Entity>> {
        let Some(items_to_parse) = &self.items_to_parse else {
            return Ok(vec![self.build(resource)?]);
        };

        let items = match items_to_parse.evaluate_first(resource)? {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        items
            .into_iter()
            .map(|item| self.build(&with_item(resource, item)))
            .collect()
    }

    fn delete(&self, resource: &Value) -> Result<Entity> {
        let identifier = self.identifier(resource.get("identifier").cloned().unwrap_or_default())?;
        Ok(Entity::reference(self.blueprint()?, identifier))
    }
}

/// The resource document with `item` set to one element of `itemsToParse`.
fn with_item(resource: &Value, item: Value) -> Value {
    let mut document = match resource {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    document.insert("item".into(), item);
    Value::Object(document)
}

impl EntityMapper {
    /// Compile a selector and mappings; any syntax error fails the whole kind.
    pub fn compile(selector: Option<&str>, mappings: &[Mapping]) -> Result<Self> {
        Ok(Self {
            selector: selector.map(Expression::compile).transpose()?,
            mappings: mappings
                .iter()
                .map(CompiledMapping::compile)
                .collect::<Result<_>>()?,
        })
    }

    pub fn for_resource(config: &ResourceConfig) -> Result<Self> {
        Self::compile(config.selector.query.as_deref(), config.mappings())
    }

    /// Produce the entities for one resource document.
    ///
    /// Fails only when the selector cannot be evaluated. A failing mapping is
    /// reported in `failures` and the other mappings still run.
    pub fn create_entities(&self, resource: &Value, action: ActionType) -> Result<MappedEntities> {
        let mut mapped = MappedEntities::default();

        if action == ActionType::Delete {
            for mapping in &self.mappings {
                match mapping.delete(resource) {
                    Ok(entity) if !mapped.entities.contains(&entity) => {
                        mapped.entities.push(entity)
                    }
                    Ok(_) => {}
                    Err(e) => mapped.failures.push(e),
                }
            }
            return Ok(mapped);
        }

        if let Some(selector) = &self.selector {
            if is_falsy(&selector.evaluate_first(resource)?) {
                return Ok(mapped);
            }
        }

        for mapping in &self.mappings {
            match mapping.upsert(resource) {
                Ok(entities) => mapped.entities.extend(entities),
                Err(e) => mapped.failures.push(e),
            }
        }
        Ok(mapped)
    }
}
