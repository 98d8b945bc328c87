//! Engine that keeps local records and their remote counterparts in step.
//!
//! Reads are cache-first: a fresh local record is returned as-is, an expired
//! one is pulled from the remote side first, and a local miss on a registered
//! finder is fetched remotely and created locally. Writes go through to the
//! remote side before they are committed locally.

use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::state::SyncContext;
use super::traits::{Fetched, PullOutcome, SyncSource};
use crate::error::{Error, Result};
use crate::model::{Finder, Operation, SyncModel};
use crate::record::Record;
use crate::remote::{check_shape, Lookup, RemoteModel, RemoteQuery, RemoteResource};
use crate::store::LocalStore;

/// Reconciles one model's local records with a remote model.
///
/// The model definition and store are shared; the remote adapter is bound
/// per handle, so [`with_remote_model`](Self::with_remote_model) never
/// affects other holders of the same model.
pub struct ReconciliationEngine<S: LocalStore> {
  model: Arc<SyncModel>,
  remote: Arc<dyn RemoteModel>,
  store: Arc<S>,
}

impl<S: LocalStore> Clone for ReconciliationEngine<S> {
  fn clone(&self) -> Self {
    Self {
      model: Arc::clone(&self.model),
      remote: Arc::clone(&self.remote),
      store: Arc::clone(&self.store),
    }
  }
}

impl<S: LocalStore> ReconciliationEngine<S> {
  /// Bind a model to a remote adapter and a store.
  ///
  /// When remote model validation resolves to on, the adapter's shape is
  /// checked against the model here rather than on first use.
  pub fn new(
    model: SyncModel,
    remote: Arc<dyn RemoteModel>,
    store: Arc<S>,
    ctx: &SyncContext,
  ) -> Result<Self> {
    let engine = Self {
      model: Arc::new(model),
      remote,
      store,
    };
    engine.check_remote(ctx)?;
    Ok(engine)
  }

  /// A handle on the same model and store talking to another remote adapter.
  pub fn with_remote_model(&self, remote: Arc<dyn RemoteModel>, ctx: &SyncContext) -> Result<Self> {
    let engine = Self {
      model: Arc::clone(&self.model),
      remote,
      store: Arc::clone(&self.store),
    };
    engine.check_remote(ctx)?;
    Ok(engine)
  }

  fn check_remote(&self, ctx: &SyncContext) -> Result<()> {
    if self.validates_models(ctx) {
      check_shape(&self.model, self.remote.as_ref())?;
      debug!(
        "Remote model '{}' matches model '{}'",
        self.remote.name(),
        self.model.name()
      );
    }
    Ok(())
  }

  pub fn model(&self) -> &SyncModel {
    &self.model
  }

  pub fn remote(&self) -> &dyn RemoteModel {
    self.remote.as_ref()
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub fn is_nosync(&self, ctx: &SyncContext, record: Option<&Record>) -> bool {
    ctx.is_nosync(self.model.name(), self.model.nosync_default(), record)
  }

  fn validates_models(&self, ctx: &SyncContext) -> bool {
    ctx.validates_models(self.model.name(), self.model.validate_remote_model_default())
  }

  /// Look a record up by the value(s) of its remote key.
  pub async fn find(&self, ctx: &SyncContext, key: &[Value]) -> Result<Option<Record>> {
    let local_key = self.model.local_key();
    if key.len() != local_key.len() {
      return Err(Error::Route(format!(
        "model '{}' is keyed by {} attribute(s), got {} value(s)",
        self.model.name(),
        local_key.len(),
        key.len()
      )));
    }
    let attrs: Vec<(&str, Value)> = local_key
      .iter()
      .map(String::as_str)
      .zip(key.iter().cloned())
      .collect();
    self.find_by(ctx, &attrs).await
  }

  pub async fn find_by(&self, ctx: &SyncContext, attrs: &[(&str, Value)]) -> Result<Option<Record>> {
    Ok(self.fetch_by(ctx, attrs).await?.map(|fetched| fetched.data))
  }

  /// Like [`find_by`](Self::find_by), but a miss is an error.
  pub async fn find_by_or_fail(&self, ctx: &SyncContext, attrs: &[(&str, Value)]) -> Result<Record> {
    self.find_by(ctx, attrs).await?.ok_or_else(|| {
      Error::RecordNotFound(format!("{} with {}", self.model.name(), describe(attrs)))
    })
  }

  /// Look a record up and report where it came from.
  ///
  /// A local hit is pulled first if expired; soft remote failures during that
  /// pull serve the stale record. A local miss is fetched remotely only when
  /// the attributes form a registered finder.
  pub async fn fetch_by(
    &self,
    ctx: &SyncContext,
    attrs: &[(&str, Value)],
  ) -> Result<Option<Fetched<Record>>> {
    let conditions: Vec<(String, Value)> = attrs
      .iter()
      .map(|(name, value)| (name.to_string(), value.clone()))
      .collect();

    if let Some(record) = self.store.find_one(self.model.name(), &conditions)? {
      return self.refresh(ctx, record).await;
    }

    if self.is_nosync(ctx, None) {
      debug!("{} with {} not found locally (nosync)", self.model.name(), describe(attrs));
      return Ok(None);
    }

    let names: Vec<&str> = attrs.iter().map(|(name, _)| *name).collect();
    let Some(finder) = self.model.finders().lookup(&names) else {
      debug!(
        "{} has no finder for {}; local lookup only",
        self.model.name(),
        names.join(", ")
      );
      return Ok(None);
    };

    let values: Vec<Value> = finder
      .local_keys
      .iter()
      .map(|key| {
        attrs
          .iter()
          .find(|(name, _)| *name == key.as_str())
          .map(|(_, value)| value.clone())
          .unwrap_or(Value::Null)
      })
      .collect();
    if values.iter().any(Value::is_null) {
      return Ok(None);
    }

    self.fetch_and_create(finder, &values).await
  }

  async fn refresh(&self, ctx: &SyncContext, mut record: Record) -> Result<Option<Fetched<Record>>> {
    if self.is_nosync(ctx, Some(&record)) {
      return Ok(Some(fetched(record, SyncSource::NoSync)));
    }
    if !record.is_expired() {
      return Ok(Some(fetched(record, SyncSource::Local)));
    }

    match self.pull_remote(&mut record).await {
      Ok(PullOutcome::Destroyed) => Ok(None),
      Ok(PullOutcome::Pulled) => Ok(Some(fetched(record, SyncSource::Pulled))),
      Ok(PullOutcome::NotModified) => Ok(Some(fetched(record, SyncSource::NotModified))),
      Ok(PullOutcome::Skipped) => Ok(Some(fetched(record, SyncSource::Local))),
      Err(e) if e.is_soft() => {
        warn!(
          "Refreshing {} {:?} failed, serving stale copy: {}",
          self.model.name(),
          record.id,
          e
        );
        Ok(Some(fetched(record, SyncSource::Stale)))
      }
      Err(e) => Err(e),
    }
  }

  async fn fetch_and_create(
    &self,
    finder: &Finder,
    values: &[Value],
  ) -> Result<Option<Fetched<Record>>> {
    let query = query_for(finder, values)?;
    let lookup = self
      .timed(Operation::Fetch, &query.path, self.remote.find_by(&query))
      .await?;
    let Lookup::Found(resource) = lookup else {
      debug!("{} at '{}' not found remotely", self.model.name(), query);
      return Ok(None);
    };

    let mut record = Record::new();
    for (key, value) in finder.local_keys.iter().zip(values) {
      record.set(key.clone(), value.clone());
    }
    self.merge_remote_data(&mut record, resource.as_ref());
    record.reset_expiration(self.model.expires_after());
    self.validate_on_sync(&mut record)?;
    self.store.create(self.model.name(), &mut record)?;
    debug!("Created {} {:?} from '{}'", self.model.name(), record.id, query);

    Ok(Some(fetched(record, SyncSource::Remote)))
  }

  /// Refresh a record from its remote counterpart.
  ///
  /// Destroys the local record if the counterpart is gone. Does nothing
  /// under no-sync or when the record has no remote key value yet.
  pub async fn pull(&self, ctx: &SyncContext, record: &mut Record) -> Result<PullOutcome> {
    if self.is_nosync(ctx, Some(&*record)) {
      return Ok(PullOutcome::Skipped);
    }
    self.pull_remote(record).await
  }

  async fn pull_remote(&self, record: &mut Record) -> Result<PullOutcome> {
    let Some(values) = self.key_values(record) else {
      debug!("{} {:?} has no remote key value, not pulling", self.model.name(), record.id);
      return Ok(PullOutcome::Skipped);
    };

    let mut query = query_for(self.model.key_finder()?, &values)?;
    if self.model.accepts_not_modified() {
      query = query.if_modified_since(record.remote_updated_at);
    }

    let lookup = self
      .timed(
        Operation::Pull,
        &query.path,
        self.remote.find_by_for_local(record, &query),
      )
      .await?;

    match lookup {
      Lookup::NotFound => {
        info!(
          "{} at '{}' is gone remotely, destroying local copy",
          self.model.name(),
          query
        );
        self.store.delete(self.model.name(), record)?;
        Ok(PullOutcome::Destroyed)
      }
      Lookup::NotModified => {
        record.reset_expiration(self.model.expires_after());
        self.store.save(self.model.name(), record)?;
        Ok(PullOutcome::NotModified)
      }
      Lookup::Found(resource) => {
        self.merge_remote_data(record, resource.as_ref());
        record.reset_expiration(self.model.expires_after());
        self.validate_on_sync(record)?;
        self.store.save(self.model.name(), record)?;
        Ok(PullOutcome::Pulled)
      }
    }
  }

  /// Create a record remotely, then locally.
  ///
  /// Remote rejections land on `record.errors` under local field names and
  /// fail with [`Error::Validation`]; nothing is stored in that case.
  pub async fn create(&self, ctx: &SyncContext, record: &mut Record) -> Result<()> {
    record.errors.clear();
    self.validate_locally(record)?;

    if self.is_nosync(ctx, Some(&*record)) {
      return self.store.create(self.model.name(), record);
    }

    let mut resource = self.remote.new_resource();
    self.merge_local_data(resource.as_mut(), record, None);
    let saved = self
      .timed(Operation::Create, self.model.name(), resource.save())
      .await?;
    if !saved {
      return Err(self.reject(record, resource.as_ref()));
    }

    self.merge_remote_data(record, resource.as_ref());
    record.reset_expiration(self.model.expires_after());
    if let Err(e) = self.store.create(self.model.name(), record) {
      error!(
        "{} was created remotely but could not be stored locally; the remote copy is orphaned: {}",
        self.model.name(),
        e
      );
      return Err(e);
    }
    Ok(())
  }

  /// Push a record's changed mapped fields, then store it.
  ///
  /// Changes to unmapped fields only are stored without any remote call.
  pub async fn update(&self, ctx: &SyncContext, record: &mut Record) -> Result<()> {
    if record.is_new() {
      return self.create(ctx, record).await;
    }
    record.errors.clear();
    self.validate_locally(record)?;

    let attributes = self.model.attributes();
    let changed: BTreeSet<String> = self
      .store
      .changed_fields(record)
      .into_iter()
      .filter(|field| attributes.has_local(field))
      .collect();

    if changed.is_empty() || self.is_nosync(ctx, Some(&*record)) {
      debug!("{} {:?}: no remote update needed", self.model.name(), record.id);
      return self.store.update(self.model.name(), record);
    }

    let values = self.key_values(record).ok_or_else(|| {
      Error::NotFound(format!(
        "{} {:?} has no remote key value to update",
        self.model.name(),
        record.id
      ))
    })?;
    let query = query_for(self.model.key_finder()?, &values)?;
    let lookup = self.counterpart(Operation::Update, record, &query).await?;
    let Lookup::Found(mut resource) = lookup else {
      return Err(Error::NotFound(format!("{} at '{}'", self.model.name(), query)));
    };

    self.merge_local_data(resource.as_mut(), record, Some(&changed));
    let saved = self
      .timed(Operation::Update, &query.path, resource.save())
      .await?;
    if !saved {
      return Err(self.reject(record, resource.as_ref()));
    }

    self.merge_remote_data(record, resource.as_ref());
    record.reset_expiration(self.model.expires_after());
    self.store.update(self.model.name(), record)
  }

  /// Create or update depending on whether the record is stored yet.
  pub async fn save(&self, ctx: &SyncContext, record: &mut Record) -> Result<()> {
    if record.is_new() {
      self.create(ctx, record).await
    } else {
      self.update(ctx, record).await
    }
  }

  /// Destroy the remote counterpart, then the local record.
  ///
  /// A counterpart that is already gone counts as destroyed. Any other
  /// remote failure leaves the local record in place.
  pub async fn destroy(&self, ctx: &SyncContext, record: &mut Record) -> Result<()> {
    if !self.is_nosync(ctx, Some(&*record)) {
      self.destroy_remote(record).await?;
    }
    self.store.delete(self.model.name(), record)
  }

  async fn destroy_remote(&self, record: &Record) -> Result<()> {
    let Some(values) = self.key_values(record) else {
      return Ok(());
    };
    let query = query_for(self.model.key_finder()?, &values)?;
    let lookup = self.counterpart(Operation::Destroy, record, &query).await?;
    let Lookup::Found(mut resource) = lookup else {
      debug!("{} at '{}' already gone remotely", self.model.name(), query);
      return Ok(());
    };

    match self
      .timed(Operation::Destroy, &query.path, resource.destroy())
      .await
    {
      Err(e) if e.is_not_found() => Ok(()),
      other => other,
    }
  }

  /// A record's remote counterpart, for a write.
  ///
  /// "Not modified" says nothing about whether the counterpart exists, so
  /// that answer is followed by an unconditional lookup.
  async fn counterpart(
    &self,
    operation: Operation,
    record: &Record,
    query: &RemoteQuery,
  ) -> Result<Lookup> {
    let lookup = self
      .timed(operation, &query.path, self.remote.find_by_for_local(record, query))
      .await?;
    match lookup {
      Lookup::NotModified => {
        self
          .timed(operation, &query.path, self.remote.find_by(query))
          .await
      }
      other => Ok(other),
    }
  }

  /// Mark a record expired so the next lookup pulls it. No remote call.
  pub fn expire(&self, record: &mut Record) -> Result<()> {
    record.expires_at = Some(Utc::now() - Duration::days(1));
    self.store.save(self.model.name(), record)
  }

  /// Fetch a remote collection and reconcile every member locally.
  ///
  /// Members are matched to local records on the remote key; matches are
  /// refreshed, the rest created. Under no-sync the local set is returned.
  pub async fn all_by_remote(&self, ctx: &SyncContext, path: Option<&str>) -> Result<Vec<Record>> {
    if self.is_nosync(ctx, None) {
      return self.store.find_all(self.model.name(), &[]);
    }

    let query = RemoteQuery::path(path.unwrap_or_default());
    let resources = self
      .timed(Operation::List, &query.path, self.remote.all_by(&query))
      .await?;

    let remote_keys = self.model.remote_key().remote();
    let local_keys = self.model.local_key();
    let mut records = Vec::with_capacity(resources.len());

    for resource in resources {
      let values: Vec<Value> = remote_keys
        .iter()
        .map(|key| resource.get(key).unwrap_or(Value::Null))
        .collect();
      if values.iter().any(Value::is_null) {
        warn!("Skipping remote {} without a key value", self.model.name());
        continue;
      }

      let conditions: Vec<(String, Value)> = local_keys.iter().cloned().zip(values).collect();
      let mut record = match self.store.find_one(self.model.name(), &conditions)? {
        Some(existing) => existing,
        None => Record::with_fields(conditions),
      };
      self.merge_remote_data(&mut record, resource.as_ref());
      record.reset_expiration(self.model.expires_after());
      self.validate_on_sync(&mut record)?;
      self.store.save(self.model.name(), &mut record)?;
      records.push(record);
    }

    debug!("Reconciled {} {} record(s)", records.len(), self.model.name());
    Ok(records)
  }

  /// Copy every mapped field the resource carries into the record.
  pub fn merge_remote_data(&self, record: &mut Record, resource: &dyn RemoteResource) {
    for (remote, local) in self.model.attributes().pairs() {
      if resource.has_field(remote) {
        record.set(local, resource.get(remote).unwrap_or(Value::Null));
      }
    }
    if let Some(updated_at) = resource.updated_at() {
      record.remote_updated_at = Some(updated_at);
    }
  }

  /// Copy mapped local fields into the resource, optionally only `changes`.
  pub fn merge_local_data(
    &self,
    resource: &mut dyn RemoteResource,
    record: &Record,
    changes: Option<&BTreeSet<String>>,
  ) {
    for (remote, local) in self.model.attributes().pairs() {
      if changes.map_or(true, |changed| changed.contains(local)) {
        resource.set(remote, record.get(local));
      }
    }
  }

  /// Move a resource's errors onto the record under local names.
  fn reject(&self, record: &mut Record, resource: &dyn RemoteResource) -> Error {
    let attributes = self.model.attributes();
    for (field, messages) in resource.errors().iter() {
      for message in messages {
        record.errors.add(attributes.local_name_for(field), message.clone());
      }
    }
    debug!("Remote rejected {}: {}", self.model.name(), record.errors);
    Error::Validation(record.errors.clone())
  }

  fn validate_locally(&self, record: &mut Record) -> Result<()> {
    let errors = self.model.validate(record);
    if errors.is_empty() {
      return Ok(());
    }
    record.errors.merge(&errors);
    Err(Error::Validation(errors))
  }

  fn validate_on_sync(&self, record: &mut Record) -> Result<()> {
    if self.model.skip_validation_on_sync() {
      return Ok(());
    }
    self.validate_locally(record)
  }

  /// The record's remote key value(s), unless any is null.
  fn key_values(&self, record: &Record) -> Option<Vec<Value>> {
    let values: Vec<Value> = self
      .model
      .local_key()
      .iter()
      .map(|key| record.get(key))
      .collect();
    if values.iter().any(Value::is_null) {
      None
    } else {
      Some(values)
    }
  }

  async fn timed<T, F>(&self, operation: Operation, target: &str, call: F) -> Result<T>
  where
    F: Future<Output = Result<T>>,
  {
    let limit = self.model.timeouts().for_operation(operation);
    debug!(
      "{} {} '{}' (timeout {:?})",
      self.model.name(),
      operation.as_str(),
      target,
      limit
    );
    match tokio::time::timeout(limit, call).await {
      Ok(result) => result,
      Err(_) => Err(Error::Timeout(format!(
        "{} {} '{}' took longer than {:?}",
        self.model.name(),
        operation.as_str(),
        target,
        limit
      ))),
    }
  }
}

fn fetched(record: Record, source: SyncSource) -> Fetched<Record> {
  let expires_at = record.expires_at;
  Fetched::new(record, source, expires_at)
}

fn query_for(finder: &Finder, values: &[Value]) -> Result<RemoteQuery> {
  let path = finder.path_for(values)?;
  let keys = finder
    .remote_keys
    .iter()
    .cloned()
    .zip(values.iter().cloned())
    .collect();
  Ok(RemoteQuery::new(path, keys))
}

fn describe(attrs: &[(&str, Value)]) -> String {
  attrs
    .iter()
    .map(|(name, value)| format!("{}={}", name, value))
    .collect::<Vec<_>>()
    .join(", ")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Timeouts;
  use crate::record::FieldErrors;
  use crate::remote::{Failure, MemoryRemote, NullRemote};
  use crate::store::{conditions, MemoryStore};
  use crate::sync::state::{Level, Setting};
  use async_trait::async_trait;
  use chrono::DateTime;
  use serde_json::json;
  use std::sync::Mutex;

  fn tenants() -> SyncModel {
    SyncModel::builder("tenants")
      .attributes(["slug"])
      .map_attribute("name", "church_name")
      .map_attribute("remote_id", "id")
      .fetch_with(["slug"])
      .build()
      .unwrap()
  }

  fn engine_for(model: SyncModel, remote: Arc<dyn RemoteModel>) -> ReconciliationEngine<MemoryStore> {
    ReconciliationEngine::new(model, remote, Arc::new(MemoryStore::new()), &SyncContext::new()).unwrap()
  }

  fn engine(remote: &MemoryRemote) -> ReconciliationEngine<MemoryStore> {
    engine_for(tenants(), Arc::new(remote.clone()))
  }

  /// Put a record straight into the store, bypassing the remote side.
  fn stored(engine: &ReconciliationEngine<MemoryStore>, fields: Value, expired: bool) -> Record {
    let mut record = Record::new();
    for (name, value) in fields.as_object().unwrap() {
      record.set(name.clone(), value.clone());
    }
    record.expires_at = Some(if expired {
      Utc::now() - Duration::days(1)
    } else {
      Utc::now() + Duration::days(1)
    });
    engine.store().create("tenants", &mut record).unwrap();
    record
  }

  fn local(engine: &ReconciliationEngine<MemoryStore>, name: &str, value: Value) -> Option<Record> {
    engine
      .store()
      .find_one("tenants", &conditions([(name, value)]))
      .unwrap()
  }

  #[tokio::test]
  async fn test_fetches_and_creates_on_local_miss() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme")), ("church_name", json!("Grace"))]);
    let engine = engine(&remote);
    let ctx = SyncContext::new();

    let fetched = engine
      .fetch_by(&ctx, &[("slug", json!("acme"))])
      .await
      .unwrap()
      .unwrap();
    assert_eq!(fetched.source, SyncSource::Remote);
    assert_eq!(fetched.data.get("name"), json!("Grace"));
    assert_eq!(fetched.data.get("remote_id"), json!(1));
    assert!(!fetched.data.is_expired());
    assert_eq!(engine.store().count("tenants"), 1);

    let again = engine
      .fetch_by(&ctx, &[("slug", json!("acme"))])
      .await
      .unwrap()
      .unwrap();
    assert_eq!(again.source, SyncSource::Local);
    assert_eq!(remote.find_calls(), 1);
  }

  #[tokio::test]
  async fn test_find_by_remote_key() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme"))]);
    let engine = engine(&remote);

    let record = engine
      .find(&SyncContext::new(), &[json!(1)])
      .await
      .unwrap()
      .unwrap();
    assert_eq!(record.get("slug"), json!("acme"));
  }

  #[tokio::test]
  async fn test_missing_everywhere_is_none() {
    let remote = MemoryRemote::new("accounts");
    let engine = engine(&remote);
    let ctx = SyncContext::new();

    assert!(engine
      .find_by(&ctx, &[("slug", json!("nope"))])
      .await
      .unwrap()
      .is_none());
    assert_eq!(engine.store().count("tenants"), 0);

    let err = engine
      .find_by_or_fail(&ctx, &[("slug", json!("nope"))])
      .await
      .unwrap_err();
    assert!(matches!(err, Error::RecordNotFound(_)));
  }

  #[tokio::test]
  async fn test_expired_record_is_pulled() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme")), ("church_name", json!("New"))]);
    let engine = engine(&remote);
    stored(
      &engine,
      json!({"slug": "acme", "name": "Old", "remote_id": 1}),
      true,
    );

    let before = Utc::now();
    let fetched = engine
      .fetch_by(&SyncContext::new(), &[("slug", json!("acme"))])
      .await
      .unwrap()
      .unwrap();
    assert_eq!(fetched.source, SyncSource::Pulled);
    assert_eq!(fetched.data.get("name"), json!("New"));
    assert!(fetched.data.expires_at.unwrap() > before);
    assert!(!fetched.data.is_expired());
    assert_eq!(
      local(&engine, "slug", json!("acme")).unwrap().get("name"),
      json!("New")
    );
  }

  #[tokio::test]
  async fn test_stale_record_served_when_pull_fails_softly() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme")), ("church_name", json!("New"))]);
    let engine = engine(&remote);
    let record = stored(
      &engine,
      json!({"slug": "acme", "name": "Old", "remote_id": 1}),
      true,
    );

    for failure in [Failure::Timeout, Failure::Unavailable, Failure::Network, Failure::Tls] {
      remote.fail_finds(Some(failure));
      let fetched = engine
        .fetch_by(&SyncContext::new(), &[("slug", json!("acme"))])
        .await
        .unwrap()
        .unwrap();
      assert_eq!(fetched.source, SyncSource::Stale);
      assert_eq!(fetched.data, record);
    }
  }

  #[tokio::test]
  async fn test_slow_pull_times_out_to_stale() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme")), ("church_name", json!("New"))]);
    remote.delay(Some(std::time::Duration::from_millis(200)));
    let model = SyncModel::builder("tenants")
      .attributes(["slug"])
      .map_attribute("name", "church_name")
      .map_attribute("remote_id", "id")
      .timeouts(Timeouts {
        pull: std::time::Duration::from_millis(10),
        ..Timeouts::default()
      })
      .build()
      .unwrap();
    let engine = engine_for(model, Arc::new(remote.clone()));
    stored(
      &engine,
      json!({"slug": "acme", "name": "Old", "remote_id": 1}),
      true,
    );

    let fetched = engine
      .fetch_by(&SyncContext::new(), &[("slug", json!("acme"))])
      .await
      .unwrap()
      .unwrap();
    assert_eq!(fetched.source, SyncSource::Stale);
    assert_eq!(fetched.data.get("name"), json!("Old"));
  }

  #[tokio::test]
  async fn test_hard_errors_propagate_on_read() {
    let remote = MemoryRemote::new("accounts");
    let engine = engine(&remote);
    stored(&engine, json!({"slug": "acme", "remote_id": 1}), true);

    remote.fail_finds(Some(Failure::Server));
    let err = engine
      .find_by(&SyncContext::new(), &[("slug", json!("acme"))])
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Http { status: 500, .. }));

    // Nothing local to fall back to.
    remote.fail_finds(Some(Failure::Unavailable));
    let err = engine
      .find_by(&SyncContext::new(), &[("slug", json!("other"))])
      .await
      .unwrap_err();
    assert!(matches!(err, Error::ServiceUnavailable(_)));
  }

  #[tokio::test]
  async fn test_pull_destroys_record_gone_remotely() {
    let remote = MemoryRemote::new("accounts");
    let engine = engine(&remote);
    let ctx = SyncContext::new();
    let mut record = stored(&engine, json!({"slug": "acme", "remote_id": 7}), true);

    let outcome = engine.pull(&ctx, &mut record).await.unwrap();
    assert_eq!(outcome, PullOutcome::Destroyed);
    assert!(record.is_destroyed());
    assert!(engine.find(&ctx, &[json!(7)]).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_pull_without_key_makes_no_remote_call() {
    let remote = MemoryRemote::new("accounts");
    let engine = engine(&remote);
    let mut record = stored(&engine, json!({"slug": "acme"}), true);
    let before = record.clone();

    let outcome = engine.pull(&SyncContext::new(), &mut record).await.unwrap();
    assert_eq!(outcome, PullOutcome::Skipped);
    assert_eq!(remote.calls(), 0);
    assert_eq!(record, before);
  }

  #[tokio::test]
  async fn test_create_pushes_then_stores() {
    let remote = MemoryRemote::new("accounts");
    let engine = engine(&remote);
    let mut record = Record::with_fields([("slug", json!("acme")), ("name", json!("Grace"))]);

    engine.create(&SyncContext::new(), &mut record).await.unwrap();
    assert_eq!(record.get("remote_id"), json!(1));
    assert!(!record.is_expired());
    assert!(record.id.is_some());
    assert_eq!(remote.get(&json!(1)).unwrap()["church_name"], json!("Grace"));
  }

  #[tokio::test]
  async fn test_rejected_create_reports_local_field_errors() {
    let remote = MemoryRemote::new("accounts");
    remote.reject_saves(Some(FieldErrors::from_iter([(
      "church_name".to_string(),
      vec!["is already taken".to_string()],
    )])));
    let engine = engine(&remote);
    let mut record = Record::with_fields([("slug", json!("acme")), ("name", json!("Grace"))]);

    let err = engine.create(&SyncContext::new(), &mut record).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(record.errors.get("name"), ["is already taken".to_string()]);
    assert!(record.is_new());
    assert_eq!(engine.store().count("tenants"), 0);
  }

  #[tokio::test]
  async fn test_retried_write_starts_with_fresh_errors() {
    let remote = MemoryRemote::new("accounts");
    remote.reject_saves(Some(FieldErrors::from_iter([(
      "church_name".to_string(),
      vec!["is already taken".to_string()],
    )])));
    let engine = engine(&remote);
    let ctx = SyncContext::new();
    let mut record = Record::with_fields([("slug", json!("acme")), ("name", json!("Grace"))]);

    assert!(engine.create(&ctx, &mut record).await.is_err());
    let err = engine.create(&ctx, &mut record).await.unwrap_err();
    assert_eq!(err.to_string(), "Validation failed: name is already taken");
    assert_eq!(record.errors.get("name"), ["is already taken".to_string()]);

    remote.reject_saves(None);
    engine.create(&ctx, &mut record).await.unwrap();
    assert!(record.errors.is_empty());
    assert!(record.id.is_some());

    remote.reject_saves(Some(FieldErrors::from_iter([(
      "church_name".to_string(),
      vec!["is too short".to_string()],
    )])));
    record.set("name", "G");
    assert!(engine.update(&ctx, &mut record).await.is_err());
    remote.reject_saves(None);
    record.set("name", "Grace Church");
    engine.update(&ctx, &mut record).await.unwrap();
    assert!(record.errors.is_empty());
  }

  #[tokio::test]
  async fn test_local_validation_runs_before_remote_write() {
    let remote = MemoryRemote::new("accounts");
    let model = SyncModel::builder("tenants")
      .attributes(["slug"])
      .map_attribute("remote_id", "id")
      .validates_presence_of(["slug"])
      .build()
      .unwrap();
    let engine = engine_for(model, Arc::new(remote.clone()));

    let mut record = Record::new();
    let err = engine.create(&SyncContext::new(), &mut record).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(record.errors.get("slug"), ["can't be blank".to_string()]);
    assert_eq!(remote.calls(), 0);
  }

  #[tokio::test]
  async fn test_create_timeout_is_a_hard_failure() {
    let remote = MemoryRemote::new("accounts");
    remote.delay(Some(std::time::Duration::from_millis(200)));
    let model = SyncModel::builder("tenants")
      .attributes(["slug"])
      .map_attribute("remote_id", "id")
      .timeouts(Timeouts {
        create: std::time::Duration::from_millis(10),
        ..Timeouts::default()
      })
      .build()
      .unwrap();
    let engine = engine_for(model, Arc::new(remote.clone()));

    let mut record = Record::with_fields([("slug", json!("acme"))]);
    let err = engine.create(&SyncContext::new(), &mut record).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(engine.store().count("tenants"), 0);
  }

  #[tokio::test]
  async fn test_update_of_unmapped_field_skips_remote() {
    let remote = MemoryRemote::new("accounts");
    let engine = engine(&remote);
    let mut record = stored(&engine, json!({"slug": "acme", "remote_id": 1}), false);

    record.set("notes", "local only");
    engine.update(&SyncContext::new(), &mut record).await.unwrap();
    assert_eq!(remote.calls(), 0);
    assert_eq!(
      local(&engine, "slug", json!("acme")).unwrap().get("notes"),
      json!("local only")
    );
  }

  #[tokio::test]
  async fn test_update_pushes_only_changed_fields() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme")), ("church_name", json!("Grace"))]);
    let engine = engine(&remote);
    let mut record = stored(
      &engine,
      json!({"slug": "acme", "name": "Grace", "remote_id": 1}),
      false,
    );
    remote.update(&json!(1), "slug", json!("acme-remote"));

    record.set("name", "Wonky");
    engine.update(&SyncContext::new(), &mut record).await.unwrap();

    let stored_remotely = remote.get(&json!(1)).unwrap();
    assert_eq!(stored_remotely["church_name"], json!("Wonky"));
    assert_eq!(stored_remotely["slug"], json!("acme-remote"));
    assert_eq!(record.get("slug"), json!("acme-remote"));
    assert!(record.changed_fields().is_empty());
  }

  #[tokio::test]
  async fn test_rejected_update_leaves_local_copy_alone() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme")), ("church_name", json!("Grace"))]);
    let engine = engine(&remote);
    let mut record = stored(
      &engine,
      json!({"slug": "acme", "name": "Grace", "remote_id": 1}),
      false,
    );
    remote.reject_saves(Some(FieldErrors::from_iter([(
      "church_name".to_string(),
      vec!["is too short".to_string()],
    )])));

    record.set("name", "G");
    let err = engine.update(&SyncContext::new(), &mut record).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(record.errors.get("name"), ["is too short".to_string()]);
    assert_eq!(
      local(&engine, "slug", json!("acme")).unwrap().get("name"),
      json!("Grace")
    );
  }

  #[tokio::test]
  async fn test_destroy_remote_then_local() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme"))]);
    let engine = engine(&remote);
    let mut record = stored(&engine, json!({"slug": "acme", "remote_id": 1}), false);

    engine.destroy(&SyncContext::new(), &mut record).await.unwrap();
    assert!(remote.is_empty());
    assert_eq!(engine.store().count("tenants"), 0);
  }

  #[tokio::test]
  async fn test_destroy_when_already_gone_remotely() {
    let remote = MemoryRemote::new("accounts");
    let engine = engine(&remote);
    let mut record = stored(&engine, json!({"slug": "acme", "remote_id": 4}), false);

    engine.destroy(&SyncContext::new(), &mut record).await.unwrap();
    assert!(record.is_destroyed());
    assert_eq!(engine.store().count("tenants"), 0);
  }

  #[tokio::test]
  async fn test_failed_remote_destroy_keeps_local_record() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme"))]);
    remote.fail_destroys(Some(Failure::Server));
    let engine = engine(&remote);
    let mut record = stored(&engine, json!({"slug": "acme", "remote_id": 1}), false);

    assert!(engine.destroy(&SyncContext::new(), &mut record).await.is_err());
    assert!(!record.is_destroyed());
    assert_eq!(engine.store().count("tenants"), 1);
  }

  #[tokio::test]
  async fn test_nosync_suppresses_remote_calls() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("remote-only"))]);
    let engine = engine(&remote);
    let mut ctx = SyncContext::new();
    stored(&engine, json!({"slug": "acme", "remote_id": 1}), true);

    {
      let scope = ctx.nosync();
      let fetched = engine
        .fetch_by(&scope, &[("slug", json!("acme"))])
        .await
        .unwrap()
        .unwrap();
      assert_eq!(fetched.source, SyncSource::NoSync);
      assert!(engine
        .find_by(&scope, &[("slug", json!("remote-only"))])
        .await
        .unwrap()
        .is_none());

      let mut record = Record::with_fields([("slug", json!("offline"))]);
      engine.create(&scope, &mut record).await.unwrap();
      assert!(record.id.is_some());
      assert!(record.get("remote_id").is_null());
    }
    assert_eq!(remote.calls(), 0);

    // A record-level override beats the process-level flag.
    let scope = ctx.nosync();
    let mut record = Record::with_fields([("slug", json!("online"))]);
    record.nosync = Some(false);
    engine.create(&scope, &mut record).await.unwrap();
    assert_eq!(remote.save_calls(), 1);
  }

  #[tokio::test]
  async fn test_model_level_nosync_default() {
    let remote = MemoryRemote::new("accounts");
    let model = SyncModel::builder("tenants")
      .attributes(["slug"])
      .map_attribute("remote_id", "id")
      .nosync(Some(true))
      .build()
      .unwrap();
    let engine = engine_for(model, Arc::new(remote.clone()));
    let ctx = SyncContext::new();

    let mut record = Record::with_fields([("slug", json!("acme"))]);
    engine.create(&ctx, &mut record).await.unwrap();
    assert_eq!(remote.calls(), 0);

    let resumed = ctx.with(Level::model("tenants"), Setting::NoSync, Some(false));
    let mut record = Record::with_fields([("slug", json!("synced"))]);
    engine.create(&resumed, &mut record).await.unwrap();
    assert_eq!(remote.save_calls(), 1);
  }

  #[tokio::test]
  async fn test_merge_round_trip_is_stable() {
    let remote = MemoryRemote::new("accounts");
    let inserted = remote.insert([
      ("slug", json!("acme")),
      ("church_name", json!("Grace")),
      ("website", json!("https://example.com")),
    ]);
    let engine = engine(&remote);
    let query = RemoteQuery::new("1", vec![("id".to_string(), inserted["id"].clone())]);
    let mut resource = remote.find_by(&query).await.unwrap().into_resource().unwrap();

    let mut record = Record::new();
    engine.merge_remote_data(&mut record, resource.as_ref());
    let first = record.fields().clone();

    engine.merge_local_data(resource.as_mut(), &record, None);
    engine.merge_remote_data(&mut record, resource.as_ref());
    assert_eq!(record.fields(), &first);
    assert!(record.get("website").is_null());
  }

  #[tokio::test]
  async fn test_null_remote_behaves_locally() {
    let engine = engine_for(tenants(), Arc::new(NullRemote));
    let ctx = SyncContext::new();

    assert!(engine
      .find_by(&ctx, &[("slug", json!("acme"))])
      .await
      .unwrap()
      .is_none());

    let mut record = Record::with_fields([("slug", json!("acme")), ("name", json!("Grace"))]);
    engine.create(&ctx, &mut record).await.unwrap();
    record.set("remote_id", 5);
    engine.update(&ctx, &mut record).await.unwrap();
    engine.expire(&mut record).unwrap();

    let fetched = engine
      .fetch_by(&ctx, &[("slug", json!("acme"))])
      .await
      .unwrap()
      .unwrap();
    assert_eq!(fetched.source, SyncSource::Pulled);
    assert_eq!(fetched.data.get("name"), json!("Grace"));

    let mut record = fetched.data;
    engine.destroy(&ctx, &mut record).await.unwrap();
    assert_eq!(engine.store().count("tenants"), 0);
  }

  #[tokio::test]
  async fn test_all_by_remote_reconciles_collection() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme")), ("church_name", json!("Renamed"))]);
    remote.insert([("slug", json!("beta")), ("church_name", json!("Beta"))]);
    let engine = engine(&remote);
    stored(
      &engine,
      json!({"slug": "acme", "name": "Acme", "remote_id": 1}),
      false,
    );

    let records = engine.all_by_remote(&SyncContext::new(), None).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(engine.store().count("tenants"), 2);
    assert_eq!(
      local(&engine, "remote_id", json!(1)).unwrap().get("name"),
      json!("Renamed")
    );
    assert!(records.iter().all(|r| !r.is_expired()));
  }

  #[tokio::test]
  async fn test_unregistered_finder_is_local_only() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme")), ("church_name", json!("Grace"))]);
    let engine = engine(&remote);
    let ctx = SyncContext::new();

    assert!(engine
      .find_by(&ctx, &[("name", json!("Grace"))])
      .await
      .unwrap()
      .is_none());
    assert_eq!(remote.calls(), 0);

    stored(
      &engine,
      json!({"slug": "acme", "name": "Grace", "remote_id": 1}),
      true,
    );
    let fetched = engine
      .fetch_by(&ctx, &[("name", json!("Grace"))])
      .await
      .unwrap()
      .unwrap();
    assert_eq!(fetched.source, SyncSource::Pulled);
  }

  #[tokio::test]
  async fn test_expire_forces_next_pull() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme")), ("church_name", json!("Grace"))]);
    let engine = engine(&remote);
    let mut record = stored(&engine, json!({"slug": "acme", "remote_id": 1}), false);

    engine.expire(&mut record).unwrap();
    assert!(record.is_expired());
    assert!(local(&engine, "slug", json!("acme")).unwrap().is_expired());
    assert_eq!(remote.calls(), 0);
  }

  #[tokio::test]
  async fn test_pulled_data_is_validated_unless_skipped() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme"))]);
    let builder = SyncModel::builder("tenants")
      .attributes(["slug"])
      .map_attribute("name", "church_name")
      .map_attribute("remote_id", "id")
      .fetch_with(["slug"])
      .validates_presence_of(["name"]);

    let strict = engine_for(builder.clone().build().unwrap(), Arc::new(remote.clone()));
    let err = strict
      .find_by(&SyncContext::new(), &[("slug", json!("acme"))])
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let lenient = engine_for(
      builder.skip_validation_on_sync(true).build().unwrap(),
      Arc::new(remote.clone()),
    );
    assert!(lenient
      .find_by(&SyncContext::new(), &[("slug", json!("acme"))])
      .await
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_remote_timestamp_is_kept() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([
      ("slug", json!("acme")),
      ("updated_at", json!("2024-03-01T12:00:00Z")),
    ]);
    let engine = engine(&remote);

    let record = engine
      .find_by(&SyncContext::new(), &[("slug", json!("acme"))])
      .await
      .unwrap()
      .unwrap();
    assert_eq!(
      record.remote_updated_at.unwrap().to_rfc3339(),
      "2024-03-01T12:00:00+00:00"
    );
  }

  /// Answers every local lookup "not modified" and records the condition it was asked.
  #[derive(Default)]
  struct UnchangedRemote {
    seen: Mutex<Option<DateTime<Utc>>>,
  }

  #[async_trait]
  impl RemoteModel for UnchangedRemote {
    fn name(&self) -> &str {
      "unchanged"
    }

    fn new_resource(&self) -> Box<dyn RemoteResource> {
      NullRemote.new_resource()
    }

    async fn find_by(&self, _query: &RemoteQuery) -> Result<Lookup> {
      Ok(Lookup::NotFound)
    }

    async fn find_by_for_local(&self, _local: &Record, query: &RemoteQuery) -> Result<Lookup> {
      *self.seen.lock().unwrap() = query.if_modified_since;
      Ok(Lookup::NotModified)
    }

    async fn all_by(&self, _query: &RemoteQuery) -> Result<Vec<Box<dyn RemoteResource>>> {
      Ok(Vec::new())
    }
  }

  #[tokio::test]
  async fn test_not_modified_resets_expiry_without_merging() {
    let remote = Arc::new(UnchangedRemote::default());
    let model = SyncModel::builder("tenants")
      .attributes(["slug"])
      .map_attribute("remote_id", "id")
      .accepts_not_modified(true)
      .build()
      .unwrap();
    let engine = engine_for(model, remote.clone());

    let since = Utc::now() - Duration::hours(3);
    let mut record = Record::with_fields([("slug", json!("acme")), ("remote_id", json!(1))]);
    record.remote_updated_at = Some(since);
    record.expires_at = Some(Utc::now() - Duration::days(1));
    engine.store().create("tenants", &mut record).unwrap();

    let outcome = engine.pull(&SyncContext::new(), &mut record).await.unwrap();
    assert_eq!(outcome, PullOutcome::NotModified);
    assert!(!record.is_expired());
    assert_eq!(record.get("slug"), json!("acme"));
    assert_eq!(*remote.seen.lock().unwrap(), Some(since));
  }

  /// Answers "not modified" to any local lookup carrying a remote timestamp.
  struct ConditionalRemote {
    inner: MemoryRemote,
  }

  #[async_trait]
  impl RemoteModel for ConditionalRemote {
    fn name(&self) -> &str {
      self.inner.name()
    }

    fn new_resource(&self) -> Box<dyn RemoteResource> {
      self.inner.new_resource()
    }

    async fn find_by(&self, query: &RemoteQuery) -> Result<Lookup> {
      self.inner.find_by(query).await
    }

    async fn find_by_for_local(&self, local: &Record, query: &RemoteQuery) -> Result<Lookup> {
      if local.remote_updated_at.is_some() {
        return Ok(Lookup::NotModified);
      }
      self.inner.find_by(query).await
    }

    async fn all_by(&self, query: &RemoteQuery) -> Result<Vec<Box<dyn RemoteResource>>> {
      self.inner.all_by(query).await
    }
  }

  #[tokio::test]
  async fn test_writes_look_past_not_modified() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([("slug", json!("acme")), ("church_name", json!("Grace"))]);
    let engine = engine_for(
      tenants(),
      Arc::new(ConditionalRemote {
        inner: remote.clone(),
      }),
    );
    let ctx = SyncContext::new();

    let mut record = Record::with_fields([
      ("slug", json!("acme")),
      ("name", json!("Grace")),
      ("remote_id", json!(1)),
    ]);
    record.remote_updated_at = Some(Utc::now() - Duration::hours(1));
    record.expires_at = Some(Utc::now() + Duration::days(1));
    engine.store().create("tenants", &mut record).unwrap();

    record.set("name", "Renamed");
    engine.update(&ctx, &mut record).await.unwrap();
    assert_eq!(remote.get(&json!(1)).unwrap()["church_name"], json!("Renamed"));

    engine.destroy(&ctx, &mut record).await.unwrap();
    assert_eq!(remote.destroy_calls(), 1);
    assert!(remote.is_empty());
    assert_eq!(engine.store().count("tenants"), 0);
  }

  fn group_tenants() -> SyncModel {
    SyncModel::builder("tenants")
      .attributes(["group_id", "slug"])
      .map_attribute("name", "church_name")
      .map_attribute("remote_id", "id")
      .remote_key(["group_id", "slug"])
      .remote_path("groups/:group_id/tenants/:slug")
      .build()
      .unwrap()
  }

  #[tokio::test]
  async fn test_composite_key_round_trip() {
    let remote = MemoryRemote::new("accounts");
    remote.insert([
      ("group_id", json!(3)),
      ("slug", json!("acme")),
      ("church_name", json!("Grace")),
    ]);
    remote.insert([
      ("group_id", json!(4)),
      ("slug", json!("acme")),
      ("church_name", json!("Other")),
    ]);
    let engine = engine_for(group_tenants(), Arc::new(remote.clone()));
    let ctx = SyncContext::new();

    assert_eq!(
      engine
        .model()
        .key_finder()
        .unwrap()
        .path_for(&[json!(3), json!("acme")])
        .unwrap(),
      "groups/3/tenants/acme"
    );
    let err = engine.find(&ctx, &[json!(3)]).await.unwrap_err();
    assert!(matches!(err, Error::Route(_)));

    let mut record = engine
      .find(&ctx, &[json!(3), json!("acme")])
      .await
      .unwrap()
      .unwrap();
    assert_eq!(record.get("name"), json!("Grace"));
    assert_eq!(record.get("remote_id"), json!(1));
    let id = record.id;

    remote.update(&json!(1), "church_name", json!("Renamed"));
    assert_eq!(
      engine.pull(&ctx, &mut record).await.unwrap(),
      PullOutcome::Pulled
    );
    assert_eq!(record.get("name"), json!("Renamed"));

    let records = engine.all_by_remote(&ctx, None).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(engine.store().count("tenants"), 2);
    let first = engine
      .store()
      .find_one(
        "tenants",
        &conditions([("group_id", json!(3)), ("slug", json!("acme"))]),
      )
      .unwrap()
      .unwrap();
    assert_eq!(first.id, id);
    let second = engine
      .store()
      .find_one(
        "tenants",
        &conditions([("group_id", json!(4)), ("slug", json!("acme"))]),
      )
      .unwrap()
      .unwrap();
    assert_eq!(second.get("name"), json!("Other"));
  }

  #[tokio::test]
  async fn test_remote_model_validation() {
    let remote = MemoryRemote::new("accounts").with_schema(["id", "slug"]);
    let mut ctx = SyncContext::new();
    ctx.set(&Level::Process, Setting::ValidateModels, Some(true));

    let err = ReconciliationEngine::new(
      tenants(),
      Arc::new(remote.clone()),
      Arc::new(MemoryStore::new()),
      &ctx,
    )
    .err()
    .unwrap();
    assert!(matches!(err, Error::Configuration(_)));

    let scope = ctx.without_validation();
    assert!(ReconciliationEngine::new(
      tenants(),
      Arc::new(remote),
      Arc::new(MemoryStore::new()),
      &scope,
    )
    .is_ok());
  }

  #[tokio::test]
  async fn test_temporary_remote_model_is_isolated() {
    let primary = MemoryRemote::new("accounts");
    primary.insert([("slug", json!("acme")), ("church_name", json!("Primary"))]);
    let secondary = MemoryRemote::new("accounts");
    secondary.insert([("slug", json!("beta")), ("church_name", json!("Secondary"))]);

    let engine = engine(&primary);
    let swapped = engine
      .with_remote_model(Arc::new(secondary.clone()), &SyncContext::new())
      .unwrap();

    let a = {
      let engine = engine.clone();
      tokio::spawn(async move {
        engine
          .find_by(&SyncContext::new(), &[("slug", json!("acme"))])
          .await
      })
    };
    let b = tokio::spawn(async move {
      swapped
        .find_by(&SyncContext::new(), &[("slug", json!("beta"))])
        .await
    });

    assert_eq!(a.await.unwrap().unwrap().unwrap().get("name"), json!("Primary"));
    assert_eq!(b.await.unwrap().unwrap().unwrap().get("name"), json!("Secondary"));
    assert_eq!(primary.find_calls(), 1);
    assert_eq!(secondary.find_calls(), 1);
    // The shared store saw both.
    assert_eq!(engine.store().count("tenants"), 2);
  }
}
