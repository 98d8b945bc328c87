//! Keep local records in step with remote REST resources.
//!
//! A [`SyncModel`] describes how one local model maps onto a remote model.
//! A [`ReconciliationEngine`] binds it to a [`RemoteModel`] adapter and a
//! [`LocalStore`], and serves cache-first reads and write-through writes:
//!
//! - lookups return fresh local records as-is, pull expired ones and fetch
//!   missing ones through registered finders
//! - creates, updates and destroys reach the remote side before the local store
//! - [`SyncContext`] scopes no-sync and remote model validation per caller

pub mod error;
pub mod model;
pub mod record;
pub mod remote;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
pub use model::{AttributeMap, Finder, Operation, Route, SyncModel, SyncModelBuilder, Timeouts};
pub use record::{FieldErrors, Record};
pub use remote::{
  HttpRemote, HttpRemoteConfig, Lookup, MemoryRemote, NullRemote, RemoteModel, RemoteQuery,
  RemoteResource,
};
pub use store::{LocalStore, MemoryStore, SqliteStore};
pub use sync::{
  ContextScope, Fetched, Flag, Level, PullOutcome, ReconciliationEngine, Setting, SyncContext,
  SyncSource,
};
