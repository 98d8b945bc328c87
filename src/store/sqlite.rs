//! SQLite-backed record store.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{Conditions, LocalStore};
use crate::error::{Error, Result};
use crate::record::Record;

/// Schema for the record table. Fields are stored as one JSON object per row.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model TEXT NOT NULL,
    data TEXT NOT NULL,
    expires_at TEXT,
    remote_updated_at TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_records_model ON records(model);
"#;

/// Store keeping every model's records in one SQLite table.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the store at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::Storage(format!("Failed to create store directory {}: {}", parent.display(), e))
      })?;
    }

    let conn = Connection::open(path)
      .map_err(|e| Error::Storage(format!("Failed to open store at {}: {}", path.display(), e)))?;
    debug!("Opened record store at {}", path.display());
    Self::with_connection(conn)
  }

  /// A throwaway store living only as long as the value.
  pub fn in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  /// Default database path under the user's data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Storage("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("remotable").join("records.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn.execute_batch(STORE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))
  }

  fn select(&self, model: &str, conditions: &Conditions, limit: Option<usize>) -> Result<Vec<Record>> {
    let mut sql = String::from(
      "SELECT id, data, expires_at, remote_updated_at FROM records WHERE model = ?",
    );
    let mut args: Vec<SqlValue> = vec![SqlValue::Text(model.to_string())];

    for (name, value) in conditions {
      args.push(SqlValue::Text(json_path(name)));
      match sql_value(value) {
        SqlValue::Null => sql.push_str(" AND json_extract(data, ?) IS NULL"),
        bound => {
          sql.push_str(" AND json_extract(data, ?) = ?");
          args.push(bound);
        }
      }
    }
    sql.push_str(" ORDER BY id");
    if let Some(limit) = limit {
      sql.push_str(&format!(" LIMIT {}", limit));
    }

    let conn = self.lock()?;
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), read_row)?;
    let mut records = Vec::new();
    for row in rows {
      records.push(row??);
    }
    Ok(records)
  }
}

type StoredRow = (i64, String, Option<String>, Option<String>);

fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<Record>> {
  let (id, data, expires_at, remote_updated_at): StoredRow =
    (row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?);
  Ok(decode(id, &data, expires_at, remote_updated_at))
}

fn decode(
  id: i64,
  data: &str,
  expires_at: Option<String>,
  remote_updated_at: Option<String>,
) -> Result<Record> {
  let fields: BTreeMap<String, Value> = serde_json::from_str(data)?;
  Ok(Record::from_stored(
    id,
    fields,
    parse_time(expires_at.as_deref())?,
    parse_time(remote_updated_at.as_deref())?,
  ))
}

fn parse_time(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  value
    .map(|s| {
      DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("Invalid timestamp '{}': {}", s, e)))
    })
    .transpose()
}

fn format_time(value: Option<DateTime<Utc>>) -> Option<String> {
  value.map(|dt| dt.to_rfc3339())
}

/// JSON path selecting a top-level field, quoted so any field name works.
fn json_path(field: &str) -> String {
  format!("$.\"{}\"", field.replace('"', "\\\""))
}

/// The SQL value `json_extract` yields for a JSON value.
fn sql_value(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Number(n) => match n.as_i64() {
      Some(i) => SqlValue::Integer(i),
      None => SqlValue::Real(n.as_f64().unwrap_or_default()),
    },
    Value::String(s) => SqlValue::Text(s.clone()),
    other => SqlValue::Text(other.to_string()),
  }
}

impl LocalStore for SqliteStore {
  fn find_one(&self, model: &str, conditions: &Conditions) -> Result<Option<Record>> {
    Ok(self.select(model, conditions, Some(1))?.into_iter().next())
  }

  fn find_all(&self, model: &str, conditions: &Conditions) -> Result<Vec<Record>> {
    self.select(model, conditions, None)
  }

  fn create(&self, model: &str, record: &mut Record) -> Result<()> {
    let data = serde_json::to_string(record.fields())?;
    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO records (model, data, expires_at, remote_updated_at) VALUES (?, ?, ?, ?)",
      params![
        model,
        data,
        format_time(record.expires_at),
        format_time(record.remote_updated_at)
      ],
    )?;
    record.mark_persisted(conn.last_insert_rowid());
    Ok(())
  }

  fn update(&self, model: &str, record: &mut Record) -> Result<()> {
    let id = record
      .id
      .ok_or_else(|| Error::Storage(format!("cannot update an unsaved {} record", model)))?;
    let data = serde_json::to_string(record.fields())?;

    let conn = self.lock()?;
    let changed = conn.execute(
      "UPDATE records SET data = ?, expires_at = ?, remote_updated_at = ?, updated_at = datetime('now')
       WHERE model = ? AND id = ?",
      params![
        data,
        format_time(record.expires_at),
        format_time(record.remote_updated_at),
        model,
        id
      ],
    )?;
    if changed == 0 {
      return Err(Error::Storage(format!("{} record {} does not exist", model, id)));
    }
    record.mark_persisted(id);
    Ok(())
  }

  fn delete(&self, model: &str, record: &mut Record) -> Result<()> {
    if let Some(id) = record.id {
      let conn = self.lock()?;
      conn.execute(
        "DELETE FROM records WHERE model = ? AND id = ?",
        params![model, id],
      )?;
    }
    record.mark_destroyed();
    Ok(())
  }
}

impl SqliteStore {
  /// Raw stored JSON of one record, for inspection.
  pub fn raw(&self, model: &str, id: i64) -> Result<Option<String>> {
    let conn = self.lock()?;
    Ok(
      conn
        .query_row(
          "SELECT data FROM records WHERE model = ? AND id = ?",
          params![model, id],
          |row| row.get(0),
        )
        .optional()?,
    )
  }
}
