// src/models/mod.rs

//! Domain models for the exporter.
//!
//! This module contains the exporter document, runtime settings, catalog
//! entities and the per-run state.

mod action;
mod config;
mod entity;
mod identity;
mod run;
mod settings;

// Re-export all public types
pub use action::ActionType;
pub use config::{
    AwsSelector, EntitySection, ExporterConfig, Mapping, PortSection, RegionState,
    ResourceConfig, Selector,
};
pub use entity::{Entity, EntityKey, EntityRef};
pub use identity::SourceIdentity;
pub use run::RunState;
pub use settings::{BudgetSettings, CatalogSettings, ConcurrencySettings, Settings};
