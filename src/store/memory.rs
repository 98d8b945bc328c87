//! In-memory store for tests and ephemeral use.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{Conditions, LocalStore};
use crate::error::{Error, Result};
use crate::record::{FieldErrors, Record};

#[derive(Debug, Clone)]
struct Row {
  id: i64,
  fields: BTreeMap<String, Value>,
  expires_at: Option<DateTime<Utc>>,
  remote_updated_at: Option<DateTime<Utc>>,
}

impl Row {
  fn to_record(&self) -> Record {
    Record::from_stored(
      self.id,
      self.fields.clone(),
      self.expires_at,
      self.remote_updated_at,
    )
  }

  fn matches(&self, conditions: &Conditions) -> bool {
    conditions
      .iter()
      .all(|(name, value)| self.fields.get(name).unwrap_or(&Value::Null) == value)
  }
}

#[derive(Debug, Default)]
struct State {
  rows: HashMap<String, Vec<Row>>,
  unique: HashMap<String, Vec<String>>,
  next_id: i64,
  writes: usize,
}

/// Store keeping rows in a mutex-guarded map.
///
/// Fields can be declared unique per model; a conflicting write fails with
/// a validation error, as a unique index would.
#[derive(Debug, Default)]
pub struct MemoryStore {
  state: Mutex<State>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject writes that would duplicate `field` within `model`.
  pub fn with_unique(self, model: &str, field: &str) -> Self {
    self
      .lock()
      .unique
      .entry(model.to_string())
      .or_default()
      .push(field.to_string());
    self
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Number of records stored for `model`.
  pub fn count(&self, model: &str) -> usize {
    self.lock().rows.get(model).map(Vec::len).unwrap_or(0)
  }

  /// Successful creates plus updates.
  pub fn writes(&self) -> usize {
    self.lock().writes
  }
}

fn check_unique(state: &State, model: &str, record: &Record) -> Result<()> {
  let Some(fields) = state.unique.get(model) else {
    return Ok(());
  };
  let rows = state.rows.get(model).map(Vec::as_slice).unwrap_or(&[]);

  let mut errors = FieldErrors::new();
  for field in fields {
    let value = record.get(field);
    if value.is_null() {
      continue;
    }
    let taken = rows
      .iter()
      .any(|row| Some(row.id) != record.id && row.fields.get(field) == Some(&value));
    if taken {
      errors.add(field.clone(), "has already been taken");
    }
  }

  if errors.is_empty() {
    Ok(())
  } else {
    Err(Error::Validation(errors))
  }
}

impl LocalStore for MemoryStore {
  fn find_one(&self, model: &str, conditions: &Conditions) -> Result<Option<Record>> {
    let state = self.lock();
    Ok(
      state
        .rows
        .get(model)
        .and_then(|rows| rows.iter().find(|row| row.matches(conditions)))
        .map(Row::to_record),
    )
  }

  fn find_all(&self, model: &str, conditions: &Conditions) -> Result<Vec<Record>> {
    let state = self.lock();
    Ok(
      state
        .rows
        .get(model)
        .map(|rows| {
          rows
            .iter()
            .filter(|row| row.matches(conditions))
            .map(Row::to_record)
            .collect()
        })
        .unwrap_or_default(),
    )
  }

  fn create(&self, model: &str, record: &mut Record) -> Result<()> {
    let mut state = self.lock();
    check_unique(&state, model, record)?;

    state.next_id += 1;
    let id = state.next_id;
    state.rows.entry(model.to_string()).or_default().push(Row {
      id,
      fields: record.fields().clone(),
      expires_at: record.expires_at,
      remote_updated_at: record.remote_updated_at,
    });
    state.writes += 1;
    record.mark_persisted(id);
    Ok(())
  }

  fn update(&self, model: &str, record: &mut Record) -> Result<()> {
    let id = record
      .id
      .ok_or_else(|| Error::Storage(format!("cannot update an unsaved {} record", model)))?;

    let mut state = self.lock();
    check_unique(&state, model, record)?;

    let row = state
      .rows
      .get_mut(model)
      .and_then(|rows| rows.iter_mut().find(|row| row.id == id))
      .ok_or_else(|| Error::Storage(format!("{} record {} does not exist", model, id)))?;
    row.fields = record.fields().clone();
    row.expires_at = record.expires_at;
    row.remote_updated_at = record.remote_updated_at;
    state.writes += 1;
    record.mark_persisted(id);
    Ok(())
  }

  fn delete(&self, model: &str, record: &mut Record) -> Result<()> {
    if let Some(id) = record.id {
      if let Some(rows) = self.lock().rows.get_mut(model) {
        rows.retain(|row| row.id != id);
      }
    }
    record.mark_destroyed();
    Ok(())
  }
}
