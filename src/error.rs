// src/error.rs

//! Unified error handling for the exporter.

use std::fmt;

use aws_sdk_s3::error::DisplayErrorContext;
use thiserror::Error;

/// Result type alias for exporter operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// AWS SDK call failed
    #[error("AWS {service} error: {message}")]
    Aws { service: String, message: String },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Expression failed to compile or evaluate
    #[error("Expression error in '{expression}': {message}")]
    Expression { expression: String, message: String },

    /// A required entity field resolved to nothing
    #[error("Missing required field value for entity, field: {field}, mapping: {mapping}")]
    MissingField { field: &'static str, mapping: String },

    /// Catalog authentication failed
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource listing or describe error
    #[error("Fetch error for {context}: {message}")]
    Fetch { context: String, message: String },

    /// Malformed single-item event
    #[error("Event error: {0}")]
    Event(String),
}

impl AppError {
    /// Create an AWS SDK error, keeping the full source chain in the message.
    pub fn aws<E>(service: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error,
    {
        Self::Aws {
            service: service.into(),
            message: DisplayErrorContext(err).to_string(),
        }
    }

    /// Create an expression error.
    pub fn expression(expression: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Expression {
            expression: expression.into(),
            message: message.to_string(),
        }
    }

    /// Create a missing required field error.
    pub fn missing_field(field: &'static str, mapping: impl Into<String>) -> Self {
        Self::MissingField {
            field,
            mapping: mapping.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a fetch error with context.
    pub fn fetch(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create an event error.
    pub fn event(message: impl Into<String>) -> Self {
        Self::Event(message.into())
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_message() {
        let err = AppError::missing_field("identifier", ".Name");
        assert_eq!(
            err.to_string(),
            "Missing required field value for entity, field: identifier, mapping: .Name"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(AppError::Authentication("401".into()).is_fatal());
        assert!(AppError::config("no bucket").is_fatal());
        assert!(!AppError::fetch("kind", "throttled").is_fatal());
    }
}
