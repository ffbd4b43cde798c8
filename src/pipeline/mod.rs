//! Pipeline entry points for sync operations.
//!
//! - `SyncEngine::run`: time-boxed sync of every configured resource kind
//! - `SyncEngine::handle_event`: sync of a single resource from an event
//! - `StaleEntityReaper`: deletion of entities a complete run no longer produced

pub mod budget;
pub mod event;
pub mod fetch;
pub mod reap;
pub mod sync;

pub use budget::{BudgetCheck, Deadline, TimeBudget, Unbounded};
pub use event::ResourceEvent;
pub use fetch::{ItemOutcome, KindOutcome, KindStatus, ResourceFetcher};
pub use reap::{ReapReport, StaleEntityReaper};
pub use sync::{RunOutcome, StepOutcome, SyncEngine};
