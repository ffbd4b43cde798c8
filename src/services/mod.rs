//! Service layer for the exporter.
//!
//! This module contains the collaborators of the sync engine:
//! - Catalog API client (`PortClient`)
//! - Dependency-aware entity writes (`EntityDispatcher`)
//! - Resource to entity mapping (`EntityMapper`)
//! - Cloud resource listing and describe (`resources`)

pub mod catalog;
pub mod dispatcher;
pub mod mapper;
pub mod resources;

pub use catalog::{Catalog, CatalogCredentials, PortClient, SearchQuery};
pub use dispatcher::EntityDispatcher;
pub use mapper::{EntityMapper, MappedEntities};
pub use resources::{AwsSourceRegistry, ListPage, ListRequest, ResourceSource, SourceRegistry};
