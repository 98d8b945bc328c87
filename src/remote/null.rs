//! A remote model that leaves local behaviour untouched.

use async_trait::async_trait;
use serde_json::Value;

use super::{Lookup, RemoteModel, RemoteQuery, RemoteResource};
use crate::error::Result;
use crate::record::{FieldErrors, Record};

/// Never discovers records that don't exist locally, and accepts every write.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRemote;

#[async_trait]
impl RemoteModel for NullRemote {
  fn name(&self) -> &str {
    "null"
  }

  fn new_resource(&self) -> Box<dyn RemoteResource> {
    Box::new(NullResource)
  }

  /// Nothing exists remotely that isn't already local.
  async fn find_by(&self, _query: &RemoteQuery) -> Result<Lookup> {
    Ok(Lookup::NotFound)
  }

  /// Every local record has an (empty) counterpart, so pulls keep it.
  async fn find_by_for_local(&self, _local: &Record, _query: &RemoteQuery) -> Result<Lookup> {
    Ok(Lookup::Found(Box::new(NullResource)))
  }

  async fn all_by(&self, _query: &RemoteQuery) -> Result<Vec<Box<dyn RemoteResource>>> {
    Ok(Vec::new())
  }
}

/// Swallows writes and has no fields of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResource;

#[async_trait]
impl RemoteResource for NullResource {
  fn get(&self, _field: &str) -> Option<Value> {
    None
  }

  fn set(&mut self, _field: &str, _value: Value) {}

  fn has_field(&self, _field: &str) -> bool {
    false
  }

  fn errors(&self) -> FieldErrors {
    FieldErrors::new()
  }

  async fn save(&mut self) -> Result<bool> {
    Ok(true)
  }

  async fn destroy(&mut self) -> Result<()> {
    Ok(())
  }
}
