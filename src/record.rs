//! Local record representation and field-level error sets.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::sync::Flag;

/// Field name -> list of messages, keyed by local field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
    self.0.entry(field.into()).or_default().push(message.into());
  }

  /// Messages for a field, empty if it has none.
  pub fn get(&self, field: &str) -> &[String] {
    self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn clear(&mut self) {
    self.0.clear();
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
    self.0.iter()
  }

  pub fn merge(&mut self, other: &FieldErrors) {
    for (field, messages) in other.iter() {
      for message in messages {
        self.add(field.clone(), message.clone());
      }
    }
  }
}

impl FromIterator<(String, Vec<String>)> for FieldErrors {
  fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
    let mut errors = FieldErrors::new();
    for (field, messages) in iter {
      for message in messages {
        errors.add(field.clone(), message);
      }
    }
    errors
  }
}

impl fmt::Display for FieldErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self
      .0
      .iter()
      .flat_map(|(field, messages)| messages.iter().map(move |m| format!("{} {}", field, m)))
      .collect();
    write!(f, "{}", parts.join(", "))
  }
}

/// A locally cached record.
///
/// Fields are kept as JSON values keyed by local field name. The record
/// remembers the values it was last loaded or persisted with, which is what
/// change detection diffs against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
  /// Local row id, assigned by the store on create
  pub id: Option<i64>,
  fields: BTreeMap<String, Value>,
  persisted: BTreeMap<String, Value>,
  /// Next time the record must be refreshed from the remote side
  pub expires_at: Option<DateTime<Utc>>,
  /// Last-modified time reported by the remote side
  pub remote_updated_at: Option<DateTime<Utc>>,
  /// Per-record no-sync override
  pub nosync: Flag,
  pub errors: FieldErrors,
  destroyed: bool,
}

impl Record {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build an unsaved record from field pairs.
  pub fn with_fields<I, K, V>(fields: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
  {
    let mut record = Self::new();
    for (name, value) in fields {
      record.set(name, value);
    }
    record
  }

  /// Rebuild a record as it was loaded from a store.
  pub fn from_stored(
    id: i64,
    fields: BTreeMap<String, Value>,
    expires_at: Option<DateTime<Utc>>,
    remote_updated_at: Option<DateTime<Utc>>,
  ) -> Self {
    Self {
      id: Some(id),
      persisted: fields.clone(),
      fields,
      expires_at,
      remote_updated_at,
      ..Self::default()
    }
  }

  /// Field value, `Null` when absent.
  pub fn get(&self, name: &str) -> Value {
    self.fields.get(name).cloned().unwrap_or(Value::Null)
  }

  pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
    self.fields.insert(name.into(), value.into());
  }

  pub fn fields(&self) -> &BTreeMap<String, Value> {
    &self.fields
  }

  /// Fields whose value differs from the last persisted state.
  pub fn changed_fields(&self) -> BTreeSet<String> {
    let null = Value::Null;
    self
      .fields
      .keys()
      .chain(self.persisted.keys())
      .filter(|name| {
        self.fields.get(*name).unwrap_or(&null) != self.persisted.get(*name).unwrap_or(&null)
      })
      .cloned()
      .collect()
  }

  pub fn is_new(&self) -> bool {
    self.id.is_none()
  }

  pub fn is_destroyed(&self) -> bool {
    self.destroyed
  }

  /// Called by stores once the current field values are durable.
  pub fn mark_persisted(&mut self, id: i64) {
    self.id = Some(id);
    self.persisted = self.fields.clone();
  }

  pub fn mark_destroyed(&mut self) {
    self.destroyed = true;
  }

  /// A missing expiry counts as already expired.
  pub fn is_expired(&self) -> bool {
    self.is_expired_at(Utc::now())
  }

  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    match self.expires_at {
      Some(expires_at) => expires_at < now,
      None => true,
    }
  }

  pub fn reset_expiration(&mut self, lifetime: Duration) {
    self.expires_at = Some(Utc::now() + lifetime);
  }

  /// Whether every condition matches the current field values.
  pub fn matches(&self, conditions: &[(String, Value)]) -> bool {
    conditions
      .iter()
      .all(|(name, value)| &self.get(name) == value)
  }
}
