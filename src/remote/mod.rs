//! Remote resource access.
//!
//! The engine only talks to the remote side through [`RemoteModel`] (class
//! level: construct, look up, list) and [`RemoteResource`] (one fetched or
//! new resource: read/write fields, save, destroy). Wire format and HTTP
//! details stay inside the adapters.

mod api_types;
mod http;
mod memory;
mod null;

pub use http::{HttpRemote, HttpRemoteConfig, HttpResource};
pub use memory::{Failure, MemoryRemote};
pub use null::NullRemote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

use crate::error::{Error, Result};
use crate::model::SyncModel;
use crate::record::{FieldErrors, Record};

/// Address of a remote lookup: the rendered route plus the remote key pairs it encodes.
///
/// Path-based adapters use `path`; adapters that can query by attribute use `keys`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteQuery {
  pub path: String,
  pub keys: Vec<(String, Value)>,
  /// Ask for the resource only if it changed after this instant
  pub if_modified_since: Option<DateTime<Utc>>,
}

impl RemoteQuery {
  pub fn new(path: impl Into<String>, keys: Vec<(String, Value)>) -> Self {
    Self {
      path: path.into(),
      keys,
      if_modified_since: None,
    }
  }

  pub fn if_modified_since(mut self, since: Option<DateTime<Utc>>) -> Self {
    self.if_modified_since = since;
    self
  }

  /// A collection query addressed by path only.
  pub fn path(path: impl Into<String>) -> Self {
    Self::new(path, Vec::new())
  }
}

impl fmt::Display for RemoteQuery {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.path)
  }
}

/// Outcome of a single-resource lookup.
#[derive(Debug)]
pub enum Lookup {
  Found(Box<dyn RemoteResource>),
  /// Conditional fetch answered "unchanged since the local copy"
  NotModified,
  NotFound,
}

impl Lookup {
  pub fn into_resource(self) -> Option<Box<dyn RemoteResource>> {
    match self {
      Lookup::Found(resource) => Some(resource),
      _ => None,
    }
  }
}

/// One remote resource, alive for a single operation.
#[async_trait]
pub trait RemoteResource: Send + Sync + fmt::Debug {
  fn get(&self, field: &str) -> Option<Value>;

  fn set(&mut self, field: &str, value: Value);

  fn has_field(&self, field: &str) -> bool;

  /// Field errors from the last rejected save, keyed by remote field name.
  fn errors(&self) -> FieldErrors;

  /// Last-modified timestamp, when the remote side reports one.
  fn updated_at(&self) -> Option<DateTime<Utc>> {
    None
  }

  /// Create or update remotely. `Ok(false)` means rejected with [`errors`](Self::errors).
  async fn save(&mut self) -> Result<bool>;

  /// Delete remotely. A resource that is already gone yields [`Error::NotFound`].
  async fn destroy(&mut self) -> Result<()>;
}

/// The remote model a local model mirrors.
#[async_trait]
pub trait RemoteModel: Send + Sync {
  fn name(&self) -> &str;

  fn primary_key(&self) -> &str {
    "id"
  }

  /// Remote attribute names the adapter knows about, if it has a schema.
  fn schema(&self) -> Option<Vec<String>> {
    None
  }

  /// An empty resource for a create.
  fn new_resource(&self) -> Box<dyn RemoteResource>;

  async fn find_by(&self, query: &RemoteQuery) -> Result<Lookup>;

  /// Lookup on behalf of an existing local record.
  ///
  /// Defaults to [`find_by`](Self::find_by); adapters override it when a
  /// local counterpart changes how the lookup should behave.
  async fn find_by_for_local(&self, local: &Record, query: &RemoteQuery) -> Result<Lookup> {
    let _ = local;
    self.find_by(query).await
  }

  async fn all_by(&self, query: &RemoteQuery) -> Result<Vec<Box<dyn RemoteResource>>>;
}

/// Check a remote model against a local model's configuration.
pub fn check_shape(model: &SyncModel, remote: &dyn RemoteModel) -> Result<()> {
  if remote.primary_key() != model.primary_key() {
    return Err(Error::Configuration(format!(
      "remote model '{}' identifies resources by '{}' but model '{}' expects '{}'",
      remote.name(),
      remote.primary_key(),
      model.name(),
      model.primary_key()
    )));
  }

  if let Some(schema) = remote.schema() {
    let missing: Vec<&str> = model
      .attributes()
      .remote_names()
      .into_iter()
      .filter(|name| !schema.iter().any(|s| s == name))
      .collect();
    if !missing.is_empty() {
      return Err(Error::Configuration(format!(
        "remote model '{}' has no attribute(s) {}",
        remote.name(),
        missing.join(", ")
      )));
    }
  }

  Ok(())
}
