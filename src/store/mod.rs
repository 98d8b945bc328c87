//! Local persistence for synced records.
//!
//! The engine never touches a database directly: it goes through
//! [`LocalStore`], which persists one model's records keyed by model name.
//! Implementations call [`Record::mark_persisted`] once a write is durable,
//! which is what later change detection diffs against.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::Result;
use crate::record::Record;

/// Equality conditions on local field names.
pub type Conditions = [(String, Value)];

/// Trait for local record storage backends.
pub trait LocalStore: Send + Sync {
  /// First record of `model` matching every condition.
  fn find_one(&self, model: &str, conditions: &Conditions) -> Result<Option<Record>>;

  /// All records of `model` matching every condition, in insertion order.
  fn find_all(&self, model: &str, conditions: &Conditions) -> Result<Vec<Record>>;

  /// Insert a new record and assign its id.
  fn create(&self, model: &str, record: &mut Record) -> Result<()>;

  /// Write every field plus expiry bookkeeping of an existing record.
  fn update(&self, model: &str, record: &mut Record) -> Result<()>;

  /// Remove a record. Removing an unknown record is not an error.
  fn delete(&self, model: &str, record: &mut Record) -> Result<()>;

  /// Fields changed since the record was loaded or last written.
  fn changed_fields(&self, record: &Record) -> BTreeSet<String> {
    record.changed_fields()
  }

  /// Insert or update depending on whether the record has an id.
  fn save(&self, model: &str, record: &mut Record) -> Result<()> {
    if record.is_new() {
      self.create(model, record)
    } else {
      self.update(model, record)
    }
  }
}

/// Owned copy of a condition list, as finders build them.
pub fn conditions<I, K>(pairs: I) -> Vec<(String, Value)>
where
  I: IntoIterator<Item = (K, Value)>,
  K: Into<String>,
{
  pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
