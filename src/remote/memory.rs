//! In-process remote model for tests and prototyping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{Lookup, RemoteModel, RemoteQuery, RemoteResource};
use crate::error::{Error, Result};
use crate::record::FieldErrors;

/// Failure a [`MemoryRemote`] can be told to raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
  Timeout,
  Unavailable,
  Network,
  Tls,
  Server,
}

impl Failure {
  fn into_error(self, what: &str) -> Error {
    match self {
      Failure::Timeout => Error::Timeout(what.to_string()),
      Failure::Unavailable => Error::ServiceUnavailable(what.to_string()),
      Failure::Network => Error::Network(what.to_string()),
      Failure::Tls => Error::Tls(what.to_string()),
      Failure::Server => Error::Http {
        status: 500,
        message: what.to_string(),
      },
    }
  }
}

#[derive(Debug, Default)]
struct State {
  resources: Vec<Map<String, Value>>,
  next_id: i64,
  schema: Option<Vec<String>>,
  find_calls: usize,
  save_calls: usize,
  destroy_calls: usize,
  list_calls: usize,
  find_failure: Option<Failure>,
  save_failure: Option<Failure>,
  destroy_failure: Option<Failure>,
  rejection: Option<FieldErrors>,
  delay: Option<Duration>,
}

/// Remote model backed by a shared in-memory list of attribute maps.
///
/// Resources are matched by the query's key pairs. Every call is counted,
/// and finds, saves and destroys can be scripted to fail.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
  name: String,
  primary_key: String,
  state: Arc<Mutex<State>>,
}

impl MemoryRemote {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      primary_key: "id".to_string(),
      state: Arc::new(Mutex::new(State {
        next_id: 1,
        ..State::default()
      })),
    }
  }

  pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
    self.primary_key = primary_key.into();
    self
  }

  pub fn with_schema<I, S>(self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.state().schema = Some(names.into_iter().map(Into::into).collect());
    self
  }

  fn state(&self) -> MutexGuard<'_, State> {
    // A panicking test thread must not wedge the others.
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Store a resource, assigning a primary key if it has none. Returns the stored attributes.
  pub fn insert<I, K>(&self, attributes: I) -> Map<String, Value>
  where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
  {
    let mut attrs: Map<String, Value> = attributes.into_iter().map(|(k, v)| (k.into(), v)).collect();
    let mut state = self.state();
    if !attrs.contains_key(&self.primary_key) {
      attrs.insert(self.primary_key.clone(), Value::from(state.next_id));
      state.next_id += 1;
    }
    state.resources.push(attrs.clone());
    attrs
  }

  /// Stored resource whose primary key equals `id`.
  pub fn get(&self, id: &Value) -> Option<Map<String, Value>> {
    self
      .state()
      .resources
      .iter()
      .find(|r| r.get(&self.primary_key) == Some(id))
      .cloned()
  }

  /// Change one attribute of a stored resource behind the local side's back.
  pub fn update(&self, id: &Value, field: &str, value: Value) {
    let mut state = self.state();
    if let Some(resource) = state
      .resources
      .iter_mut()
      .find(|r| r.get(&self.primary_key) == Some(id))
    {
      resource.insert(field.to_string(), value);
    }
  }

  pub fn remove(&self, id: &Value) {
    let primary_key = self.primary_key.clone();
    self
      .state()
      .resources
      .retain(|r| r.get(&primary_key) != Some(id));
  }

  pub fn len(&self) -> usize {
    self.state().resources.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn fail_finds(&self, failure: Option<Failure>) {
    self.state().find_failure = failure;
  }

  pub fn fail_saves(&self, failure: Option<Failure>) {
    self.state().save_failure = failure;
  }

  pub fn fail_destroys(&self, failure: Option<Failure>) {
    self.state().destroy_failure = failure;
  }

  /// Reject every save with these field errors (remote names).
  pub fn reject_saves(&self, errors: Option<FieldErrors>) {
    self.state().rejection = errors;
  }

  /// Delay every call, e.g. to trip an operation timeout.
  pub fn delay(&self, delay: Option<Duration>) {
    self.state().delay = delay;
  }

  pub fn find_calls(&self) -> usize {
    self.state().find_calls
  }

  pub fn save_calls(&self) -> usize {
    self.state().save_calls
  }

  pub fn destroy_calls(&self) -> usize {
    self.state().destroy_calls
  }

  pub fn list_calls(&self) -> usize {
    self.state().list_calls
  }

  /// Total remote calls of any kind.
  pub fn calls(&self) -> usize {
    let state = self.state();
    state.find_calls + state.save_calls + state.destroy_calls + state.list_calls
  }

  async fn pause(&self) {
    let delay = self.state().delay;
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
  }

  fn resource(&self, attributes: Map<String, Value>) -> Box<dyn RemoteResource> {
    Box::new(MemoryResource {
      remote: self.clone(),
      attributes,
      errors: FieldErrors::new(),
    })
  }

  fn matching(&self, keys: &[(String, Value)]) -> Vec<Map<String, Value>> {
    self
      .state()
      .resources
      .iter()
      .filter(|r| keys.iter().all(|(k, v)| r.get(k) == Some(v)))
      .cloned()
      .collect()
  }
}

#[async_trait]
impl RemoteModel for MemoryRemote {
  fn name(&self) -> &str {
    &self.name
  }

  fn primary_key(&self) -> &str {
    &self.primary_key
  }

  fn schema(&self) -> Option<Vec<String>> {
    self.state().schema.clone()
  }

  fn new_resource(&self) -> Box<dyn RemoteResource> {
    self.resource(Map::new())
  }

  async fn find_by(&self, query: &RemoteQuery) -> Result<Lookup> {
    let failure = {
      let mut state = self.state();
      state.find_calls += 1;
      state.find_failure
    };
    self.pause().await;
    if let Some(failure) = failure {
      return Err(failure.into_error(&format!("GET {}", query.path)));
    }

    let found = self.matching(&query.keys).into_iter().next();
    Ok(match found {
      Some(attributes) => Lookup::Found(self.resource(attributes)),
      None => Lookup::NotFound,
    })
  }

  async fn all_by(&self, query: &RemoteQuery) -> Result<Vec<Box<dyn RemoteResource>>> {
    let failure = {
      let mut state = self.state();
      state.list_calls += 1;
      state.find_failure
    };
    self.pause().await;
    if let Some(failure) = failure {
      return Err(failure.into_error(&format!("GET {}", query.path)));
    }

    Ok(
      self
        .matching(&query.keys)
        .into_iter()
        .map(|attributes| self.resource(attributes))
        .collect(),
    )
  }
}

#[derive(Debug)]
struct MemoryResource {
  remote: MemoryRemote,
  attributes: Map<String, Value>,
  errors: FieldErrors,
}

#[async_trait]
impl RemoteResource for MemoryResource {
  fn get(&self, field: &str) -> Option<Value> {
    self.attributes.get(field).cloned()
  }

  fn set(&mut self, field: &str, value: Value) {
    self.attributes.insert(field.to_string(), value);
  }

  fn has_field(&self, field: &str) -> bool {
    self.attributes.contains_key(field)
  }

  fn errors(&self) -> FieldErrors {
    self.errors.clone()
  }

  fn updated_at(&self) -> Option<DateTime<Utc>> {
    self
      .attributes
      .get("updated_at")
      .and_then(Value::as_str)
      .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
      .map(|dt| dt.with_timezone(&Utc))
  }

  async fn save(&mut self) -> Result<bool> {
    let (failure, rejection) = {
      let mut state = self.remote.state();
      state.save_calls += 1;
      (state.save_failure, state.rejection.clone())
    };
    self.remote.pause().await;
    if let Some(failure) = failure {
      return Err(failure.into_error("save"));
    }
    if let Some(errors) = rejection {
      self.errors = errors;
      return Ok(false);
    }

    self.errors.clear();
    let primary_key = self.remote.primary_key.clone();
    let mut state = self.remote.state();
    let id = self
      .attributes
      .get(&primary_key)
      .filter(|id| !id.is_null())
      .cloned();
    let existing = id
      .as_ref()
      .and_then(|id| state.resources.iter().position(|r| r.get(&primary_key) == Some(id)));

    match existing {
      Some(index) => state.resources[index] = self.attributes.clone(),
      None => {
        if id.is_none() {
          self
            .attributes
            .insert(primary_key.clone(), Value::from(state.next_id));
          state.next_id += 1;
        }
        state.resources.push(self.attributes.clone());
      }
    }
    Ok(true)
  }

  async fn destroy(&mut self) -> Result<()> {
    let failure = {
      let mut state = self.remote.state();
      state.destroy_calls += 1;
      state.destroy_failure
    };
    self.remote.pause().await;
    if let Some(failure) = failure {
      return Err(failure.into_error("destroy"));
    }

    let primary_key = self.remote.primary_key.clone();
    let id = self.attributes.get(&primary_key).filter(|id| !id.is_null()).cloned();
    let mut state = self.remote.state();
    let before = state.resources.len();
    state
      .resources
      .retain(|r| id.is_none() || r.get(&primary_key) != id.as_ref());
    if id.is_none() || state.resources.len() == before {
      return Err(Error::NotFound(format!("{} {:?}", self.remote.name, id)));
    }
    Ok(())
  }
}
