//! Single-resource events.
//!
//! An event message names a resource kind and carries expressions for the
//! identifier, region and action. The expressions are evaluated against the
//! message itself, so a raw cloud event can be forwarded unchanged with
//! mapping-style paths pointing into it.

use serde_json::Value;

use crate::error::{AppError, Result};
use crate::expr::Expression;
use crate::models::ActionType;

const DEFAULT_ACTION: &str = "\"upsert\"";

/// A resolved single-resource event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEvent {
    pub resource_type: String,
    pub identifier: String,
    pub region: String,
    pub action: ActionType,
}

impl ResourceEvent {
    /// Resolve an event message.
    pub fn resolve(message: &Value) -> Result<Self> {
        let identifier = required(message, "identifier")?;
        let region = required(message, "region")?;
        let resource_type = required(message, "resource_type")?;
        let action = field(message, "action").unwrap_or(DEFAULT_ACTION);

        let identifier = match Expression::compile(identifier)?.evaluate_first(message)? {
            Value::String(s) if !s.is_empty() => s,
            Value::Number(n) => n.to_string(),
            other => {
                return Err(AppError::event(format!(
                    "Event identifier resolved to {other}"
                )));
            }
        };
        let region = match Expression::compile(region)?.evaluate_first(message)? {
            Value::String(s) if !s.is_empty() => s,
            other => return Err(AppError::event(format!("Event region resolved to {other}"))),
        };
        let action = match Expression::compile(action)?.evaluate_first(message)? {
            Value::String(s) => s.parse()?,
            other => other.to_string().parse()?,
        };

        Ok(Self {
            resource_type: resource_type.to_string(),
            identifier,
            region,
            action,
        })
    }
}

fn field<'a>(message: &'a Value, name: &str) -> Option<&'a str> {
    message.get(name).and_then(Value::as_str)
}

fn required<'a>(message: &'a Value, name: &str) -> Result<&'a str> {
    field(message, name).ok_or_else(|| AppError::event(format!("Event must include '{name}'")))
}
