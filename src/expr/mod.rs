// src/expr/mod.rs

//! Mapping expression language.
//!
//! A jq-compatible subset used by selectors and entity mappings. An
//! expression is compiled once and evaluated against many resource documents;
//! each evaluation yields zero, one or many values.
//!
//! ```text
//! .Tags[] | select(.Key == "team") | .Value
//! "arn:aws:s3:::\(.BucketName)"
//! {name: .Name, size: (.Items | length)}
//! ```

mod builtins;
mod eval;
mod lexer;
mod parser;

use std::fmt;

use serde_json::Value;

use crate::error::{AppError, Result};

use self::parser::Ast;

/// A compiled expression.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Ast,
}

impl Expression {
    /// Compile an expression, failing on syntax errors.
    pub fn compile(source: &str) -> Result<Self> {
        let ast = lexer::tokenize(source)
            .and_then(parser::parse)
            .map_err(|e| AppError::expression(source, e))?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// All values produced for the document.
    pub fn evaluate(&self, document: &Value) -> Result<Vec<Value>> {
        eval::eval(&self.ast, document).map_err(|e| AppError::expression(&self.source, e))
    }

    /// First value produced for the document, or `null` when there is none.
    ///
    /// Evaluation stops at the first output, so a failure in a later output
    /// does not fail the call.
    pub fn evaluate_first(&self, document: &Value) -> Result<Value> {
        eval::eval_first(&self.ast, document)
            .map(|first| first.unwrap_or(Value::Null))
            .map_err(|e| AppError::expression(&self.source, e))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Falsiness used for selectors and required fields.
///
/// Broader than the language's own truthiness: empty strings, zero and empty
/// collections also count as false.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}
