//! Per-model sync configuration.
//!
//! A [`SyncModel`] is assembled once at setup through [`SyncModelBuilder`]
//! and read-only afterwards. It owns the attribute map, the resolved remote
//! key, the finder registry and the expiry/timeout settings the engine
//! consults on every operation.

mod attributes;
mod key;
mod route;

pub use attributes::AttributeMap;
pub use key::{Finder, FinderRegistry, RemoteKey};
pub use route::{join_url_segments, path_for, segment_for, Route};

use chrono::Duration;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::record::{FieldErrors, Record};
use crate::sync::Flag;

/// Kinds of remote operation, each with its own timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  List,
  Fetch,
  Pull,
  Create,
  Update,
  Destroy,
}

impl Operation {
  pub fn as_str(&self) -> &'static str {
    match self {
      Operation::List => "list",
      Operation::Fetch => "fetch",
      Operation::Pull => "pull",
      Operation::Create => "create",
      Operation::Update => "update",
      Operation::Destroy => "destroy",
    }
  }
}

/// Remote timeouts per operation kind.
///
/// Pulls happen on the read path, so they get the tightest budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
  pub list: std::time::Duration,
  pub fetch: std::time::Duration,
  pub pull: std::time::Duration,
  pub create: std::time::Duration,
  pub update: std::time::Duration,
  pub destroy: std::time::Duration,
}

impl Default for Timeouts {
  fn default() -> Self {
    use std::time::Duration as Std;
    Self {
      list: Std::from_secs(4),
      fetch: Std::from_secs(2),
      pull: Std::from_secs(1),
      create: Std::from_secs(4),
      update: Std::from_secs(2),
      destroy: Std::from_secs(2),
    }
  }
}

impl Timeouts {
  pub fn for_operation(&self, operation: Operation) -> std::time::Duration {
    match operation {
      Operation::List => self.list,
      Operation::Fetch => self.fetch,
      Operation::Pull => self.pull,
      Operation::Create => self.create,
      Operation::Update => self.update,
      Operation::Destroy => self.destroy,
    }
  }
}

/// Immutable sync settings for one model.
#[derive(Debug, Clone)]
pub struct SyncModel {
  name: String,
  attributes: AttributeMap,
  primary_key: String,
  remote_key: RemoteKey,
  finders: FinderRegistry,
  expires_after: Duration,
  timeouts: Timeouts,
  skip_validation_on_sync: bool,
  accepts_not_modified: bool,
  required: Vec<String>,
  nosync: Flag,
  validate_remote_model: Flag,
}

impl SyncModel {
  pub fn builder(name: impl Into<String>) -> SyncModelBuilder {
    SyncModelBuilder::new(name)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn attributes(&self) -> &AttributeMap {
    &self.attributes
  }

  pub fn primary_key(&self) -> &str {
    &self.primary_key
  }

  pub fn remote_key(&self) -> &RemoteKey {
    &self.remote_key
  }

  /// Local field(s) holding the fetch value.
  pub fn local_key(&self) -> &[String] {
    self.remote_key.local()
  }

  pub fn finders(&self) -> &FinderRegistry {
    &self.finders
  }

  /// Finder addressing the remote resource through the remote key.
  pub fn key_finder(&self) -> Result<&Finder> {
    let names: Vec<&str> = self.local_key().iter().map(String::as_str).collect();
    self.finders.lookup(&names).ok_or_else(|| {
      Error::Configuration(format!("model '{}' has no finder for its remote key", self.name))
    })
  }

  /// Registered route for these local attributes, or the default one.
  pub fn route_for(&self, local_keys: &[&str]) -> Route {
    match self.finders.lookup(local_keys) {
      Some(finder) => finder.route.clone(),
      None => {
        let is_primary =
          local_keys.len() == 1 && self.attributes.remote_name_for(local_keys[0]) == self.primary_key;
        Route::default_for(local_keys, is_primary)
      }
    }
  }

  pub fn remote_path_for(&self, local_keys: &[&str], values: &[Value]) -> Result<String> {
    self.route_for(local_keys).render(local_keys, values)
  }

  pub fn expires_after(&self) -> Duration {
    self.expires_after
  }

  pub fn timeouts(&self) -> &Timeouts {
    &self.timeouts
  }

  pub fn skip_validation_on_sync(&self) -> bool {
    self.skip_validation_on_sync
  }

  pub fn accepts_not_modified(&self) -> bool {
    self.accepts_not_modified
  }

  /// Configured model-level no-sync default.
  pub fn nosync_default(&self) -> Flag {
    self.nosync
  }

  pub fn validate_remote_model_default(&self) -> Flag {
    self.validate_remote_model
  }

  /// Local presence validation.
  pub fn validate(&self, record: &Record) -> FieldErrors {
    let mut errors = FieldErrors::new();
    for field in &self.required {
      let blank = match record.get(field) {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
      };
      if blank {
        errors.add(field.clone(), "can't be blank");
      }
    }
    errors
  }
}

/// Builder for [`SyncModel`]. Validation happens in [`SyncModelBuilder::build`].
#[derive(Debug, Clone)]
pub struct SyncModelBuilder {
  name: String,
  locals: Vec<String>,
  overrides: Vec<(String, String)>,
  primary_key: String,
  remote_key: Vec<String>,
  remote_path: Option<String>,
  fetch_with: Vec<(Vec<String>, Option<String>)>,
  expires_after: Duration,
  timeouts: Timeouts,
  skip_validation_on_sync: bool,
  accepts_not_modified: bool,
  required: Vec<String>,
  nosync: Flag,
  validate_remote_model: Flag,
}

impl SyncModelBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      locals: Vec::new(),
      overrides: Vec::new(),
      primary_key: "id".to_string(),
      remote_key: Vec::new(),
      remote_path: None,
      fetch_with: Vec::new(),
      expires_after: Duration::days(1),
      timeouts: Timeouts::default(),
      skip_validation_on_sync: false,
      accepts_not_modified: false,
      required: Vec::new(),
      nosync: None,
      validate_remote_model: None,
    }
  }

  /// Local attributes mapped to remote attributes of the same name.
  pub fn attributes<I, S>(mut self, locals: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.locals.extend(locals.into_iter().map(Into::into));
    self
  }

  /// Map a local attribute to a differently named remote attribute.
  pub fn map_attribute(mut self, local: impl Into<String>, remote: impl Into<String>) -> Self {
    self.overrides.push((local.into(), remote.into()));
    self
  }

  /// Remote identifier attribute of the remote model (`id` by default).
  pub fn primary_key(mut self, primary_key: impl Into<String>) -> Self {
    self.primary_key = primary_key.into();
    self
  }

  /// Remote attribute(s) addressing a resource; several make a composite key.
  pub fn remote_key<I, S>(mut self, keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.remote_key = keys.into_iter().map(Into::into).collect();
    self
  }

  /// Custom route for the remote key.
  pub fn remote_path(mut self, pattern: impl Into<String>) -> Self {
    self.remote_path = Some(pattern.into());
    self
  }

  /// Register a finder on local attributes using the default route.
  pub fn fetch_with<I, S>(mut self, locals: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self
      .fetch_with
      .push((locals.into_iter().map(Into::into).collect(), None));
    self
  }

  /// Register a finder on local attributes with an explicit route.
  pub fn fetch_with_route<I, S>(mut self, locals: I, pattern: impl Into<String>) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.fetch_with.push((
      locals.into_iter().map(Into::into).collect(),
      Some(pattern.into()),
    ));
    self
  }

  pub fn expires_after(mut self, lifetime: Duration) -> Self {
    self.expires_after = lifetime;
    self
  }

  pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
    self.timeouts = timeouts;
    self
  }

  pub fn skip_validation_on_sync(mut self, skip: bool) -> Self {
    self.skip_validation_on_sync = skip;
    self
  }

  pub fn accepts_not_modified(mut self, accepts: bool) -> Self {
    self.accepts_not_modified = accepts;
    self
  }

  pub fn validates_presence_of<I, S>(mut self, fields: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.required.extend(fields.into_iter().map(Into::into));
    self
  }

  pub fn nosync(mut self, value: Flag) -> Self {
    self.nosync = value;
    self
  }

  pub fn validate_remote_model(mut self, value: Flag) -> Self {
    self.validate_remote_model = value;
    self
  }

  pub fn build(self) -> Result<SyncModel> {
    let attributes = AttributeMap::new(self.locals, self.overrides);

    let conflicts = attributes.conflicts();
    if !conflicts.is_empty() {
      return Err(Error::Configuration(format!(
        "model '{}' maps several local attributes onto remote attribute(s) {}",
        self.name,
        conflicts.join(", ")
      )));
    }

    let remote_key = RemoteKey::resolve(&self.remote_key, &self.primary_key, &attributes)?;

    let mut finders = FinderRegistry::default();
    for (locals, pattern) in self.fetch_with {
      let finder = build_finder(&self.name, &attributes, &self.primary_key, locals, pattern)?;
      finders.register(finder);
    }

    let key_finder = build_finder(
      &self.name,
      &attributes,
      &self.primary_key,
      remote_key.local().to_vec(),
      self.remote_path.clone(),
    )?;
    if self.remote_path.is_some() {
      finders.register(key_finder);
    } else {
      finders.register_default(key_finder);
    }

    Ok(SyncModel {
      name: self.name,
      attributes,
      primary_key: self.primary_key,
      remote_key,
      finders,
      expires_after: self.expires_after,
      timeouts: self.timeouts,
      skip_validation_on_sync: self.skip_validation_on_sync,
      accepts_not_modified: self.accepts_not_modified,
      required: self.required,
      nosync: self.nosync,
      validate_remote_model: self.validate_remote_model,
    })
  }
}

fn build_finder(
  model: &str,
  attributes: &AttributeMap,
  primary_key: &str,
  locals: Vec<String>,
  pattern: Option<String>,
) -> Result<Finder> {
  if locals.is_empty() {
    return Err(Error::Configuration(format!(
      "model '{}' has a finder without attributes",
      model
    )));
  }
  if let Some(unknown) = locals.iter().find(|l| !attributes.has_local(l)) {
    return Err(Error::Configuration(format!(
      "model '{}' cannot fetch with '{}': not a mapped attribute",
      model, unknown
    )));
  }

  let route = match pattern {
    Some(pattern) => Route::new(pattern),
    None => {
      let is_primary = locals.len() == 1 && attributes.remote_name_for(&locals[0]) == primary_key;
      Route::default_for(&locals, is_primary)
    }
  };

  let placeholders = route.placeholders();
  if let Some(missing) = locals.iter().find(|l| !placeholders.contains(&l.as_str())) {
    return Err(Error::Route(format!(
      "route '{}' of model '{}' has no placeholder for '{}'",
      route, model, missing
    )));
  }

  Ok(Finder::new(locals, attributes, route))
}
