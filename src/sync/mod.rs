//! Reconciliation between local records and remote resources.
//!
//! - [`ReconciliationEngine`] runs find/pull/create/update/destroy for one model
//! - [`SyncContext`] carries the scoped no-sync and validate-models flags
//! - [`Fetched`] reports where a looked-up record came from

mod engine;
mod state;
mod traits;

pub use engine::ReconciliationEngine;
pub use state::{ContextScope, Flag, Level, Setting, SyncContext};
pub use traits::{Fetched, PullOutcome, SyncSource};
