//! Scoped no-sync and validate-models flags.
//!
//! Flags are tri-valued ([`Flag`]: set true, set false, or unset) and live at
//! three levels: process, model and record. A [`SyncContext`] carries the
//! process and model levels and is passed explicitly into every engine call,
//! so two callers holding different contexts never see each other's
//! overrides. The record level lives on [`Record::nosync`].

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use crate::record::Record;

/// `None` means unset and defers to the next level up.
pub type Flag = Option<bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
  NoSync,
  ValidateModels,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Level {
  Process,
  Model(String),
}

impl Level {
  pub fn model(name: impl Into<String>) -> Self {
    Level::Model(name.into())
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Flags {
  nosync: Flag,
  validate_models: Flag,
}

impl Flags {
  fn get(&self, setting: Setting) -> Flag {
    match setting {
      Setting::NoSync => self.nosync,
      Setting::ValidateModels => self.validate_models,
    }
  }

  fn slot(&mut self, setting: Setting) -> &mut Flag {
    match setting {
      Setting::NoSync => &mut self.nosync,
      Setting::ValidateModels => &mut self.validate_models,
    }
  }
}

/// Process- and model-level flags for one logical caller.
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
  process: Flags,
  models: HashMap<String, Flags>,
}

impl SyncContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// Raw value at one level, without falling through.
  pub fn get(&self, level: &Level, setting: Setting) -> Flag {
    match level {
      Level::Process => self.process.get(setting),
      Level::Model(name) => self.models.get(name).and_then(|f| f.get(setting)),
    }
  }

  /// Assign a level's value and return the previous one.
  pub fn set(&mut self, level: &Level, setting: Setting, value: Flag) -> Flag {
    let slot = match level {
      Level::Process => self.process.slot(setting),
      Level::Model(name) => self.models.entry(name.clone()).or_default().slot(setting),
    };
    std::mem::replace(slot, value)
  }

  /// Resolve a flag: model level, then the model's configured default, then
  /// process level. False when all are unset.
  pub fn resolve(&self, model: &str, default: Flag, setting: Setting) -> bool {
    self
      .get(&Level::model(model), setting)
      .or(default)
      .or_else(|| self.get(&Level::Process, setting))
      .unwrap_or(false)
  }

  /// Whether remote calls are suppressed; a record override beats every level.
  pub fn is_nosync(&self, model: &str, default: Flag, record: Option<&Record>) -> bool {
    match record.and_then(|r| r.nosync) {
      Some(value) => value,
      None => self.resolve(model, default, Setting::NoSync),
    }
  }

  pub fn validates_models(&self, model: &str, default: Flag) -> bool {
    self.resolve(model, default, Setting::ValidateModels)
  }

  /// Override a flag until the returned guard drops, then restore the prior value.
  ///
  /// The guard dereferences to the context, so nested scopes stack naturally.
  pub fn scope(&mut self, level: Level, setting: Setting, value: Flag) -> ContextScope<'_> {
    let prior = self.set(&level, setting, value);
    ContextScope {
      ctx: self,
      level,
      setting,
      prior,
    }
  }

  /// Run `body` with a flag overridden.
  pub fn scoped<R>(
    &mut self,
    level: Level,
    setting: Setting,
    value: Flag,
    body: impl FnOnce(&mut SyncContext) -> R,
  ) -> R {
    let mut scope = self.scope(level, setting, value);
    body(&mut scope)
  }

  /// Process-level no-sync until the guard drops.
  pub fn nosync(&mut self) -> ContextScope<'_> {
    self.scope(Level::Process, Setting::NoSync, Some(true))
  }

  /// Process-level validation off until the guard drops.
  pub fn without_validation(&mut self) -> ContextScope<'_> {
    self.scope(Level::Process, Setting::ValidateModels, Some(false))
  }

  /// An owned copy with one flag overridden.
  pub fn with(&self, level: Level, setting: Setting, value: Flag) -> SyncContext {
    let mut ctx = self.clone();
    ctx.set(&level, setting, value);
    ctx
  }
}

/// Guard returned by [`SyncContext::scope`].
pub struct ContextScope<'a> {
  ctx: &'a mut SyncContext,
  level: Level,
  setting: Setting,
  prior: Flag,
}

impl Deref for ContextScope<'_> {
  type Target = SyncContext;

  fn deref(&self) -> &SyncContext {
    self.ctx
  }
}

impl DerefMut for ContextScope<'_> {
  fn deref_mut(&mut self) -> &mut SyncContext {
    self.ctx
  }
}

impl Drop for ContextScope<'_> {
  fn drop(&mut self) {
    self.ctx.set(&self.level, self.setting, self.prior);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use tokio::sync::Barrier;

  #[test]
  fn test_nosync_is_false_by_default() {
    let ctx = SyncContext::new();
    assert!(!ctx.is_nosync("tenants", None, None));
    assert!(!ctx.is_nosync("tenants", None, Some(&Record::new())));
  }

  #[test]
  fn test_process_level_applies_to_every_model() {
    let mut ctx = SyncContext::new();
    {
      let scope = ctx.nosync();
      assert!(scope.is_nosync("tenants", None, None));
      assert!(scope.is_nosync("accounts", None, None));
    }
    assert!(!ctx.is_nosync("tenants", None, None));
  }

  #[test]
  fn test_model_level_applies_to_one_model() {
    let mut ctx = SyncContext::new();
    ctx.scoped(Level::model("tenants"), Setting::NoSync, Some(true), |ctx| {
      assert!(ctx.is_nosync("tenants", None, None));
      assert!(!ctx.is_nosync("accounts", None, None));
    });
    assert!(!ctx.is_nosync("tenants", None, None));
  }

  #[test]
  fn test_resuming_sync_temporarily() {
    let mut ctx = SyncContext::new();
    ctx.set(&Level::model("tenants"), Setting::NoSync, Some(true));
    ctx.scoped(Level::model("tenants"), Setting::NoSync, Some(false), |ctx| {
      assert!(!ctx.is_nosync("tenants", None, None));
    });
    assert!(ctx.is_nosync("tenants", None, None));
  }

  #[test]
  fn test_cleared_model_value_falls_through_to_process() {
    let mut ctx = SyncContext::new();
    ctx.set(&Level::Process, Setting::NoSync, Some(true));
    let tenants = Level::model("tenants");

    {
      let mut outer = ctx.scope(tenants.clone(), Setting::NoSync, Some(false));
      {
        let inner = outer.scope(tenants.clone(), Setting::NoSync, None);
        assert_eq!(inner.get(&tenants, Setting::NoSync), None);
        assert!(inner.is_nosync("tenants", None, None));
      }
      assert_eq!(outer.get(&tenants, Setting::NoSync), Some(false));
      assert!(!outer.is_nosync("tenants", None, None));
    }

    assert_eq!(ctx.get(&tenants, Setting::NoSync), None);
    assert!(ctx.is_nosync("tenants", None, None));
  }

  #[test]
  fn test_model_default_sits_between_levels() {
    let mut ctx = SyncContext::new();
    ctx.set(&Level::Process, Setting::NoSync, Some(true));
    assert!(!ctx.is_nosync("tenants", Some(false), None));
    assert!(ctx.is_nosync("tenants", None, None));

    ctx.set(&Level::model("tenants"), Setting::NoSync, Some(true));
    assert!(ctx.is_nosync("tenants", Some(false), None));
    ctx.set(&Level::Process, Setting::NoSync, None);
    ctx.set(&Level::model("tenants"), Setting::NoSync, None);
    assert!(ctx.is_nosync("tenants", Some(true), None));
    assert!(ctx.validates_models("tenants", Some(true)));
  }

  #[test]
  fn test_record_level_wins() {
    let mut ctx = SyncContext::new();
    let mut record = Record::new();
    record.nosync = Some(false);
    let scope = ctx.nosync();
    assert!(!scope.is_nosync("tenants", None, Some(&record)));
    assert!(scope.is_nosync("tenants", None, Some(&Record::new())));
  }

  #[test]
  fn test_without_validation() {
    let mut ctx = SyncContext::new();
    ctx.set(&Level::Process, Setting::ValidateModels, Some(true));
    {
      let scope = ctx.without_validation();
      assert!(!scope.validates_models("tenants", None));
    }
    assert!(ctx.validates_models("tenants", None));
  }

  #[test]
  fn test_restores_on_panic() {
    let mut ctx = SyncContext::new();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
      ctx.scoped(Level::Process, Setting::NoSync, Some(true), |_| panic!("boom"));
    }));
    assert!(result.is_err());
    assert_eq!(ctx.get(&Level::Process, Setting::NoSync), None);
  }

  #[tokio::test]
  async fn test_nested_scopes_on_concurrent_contexts() {
    let barrier = Arc::new(Barrier::new(2));
    let base = SyncContext::new();

    let run = |outer: bool, level: Level| {
      let barrier = Arc::clone(&barrier);
      let mut ctx = base.clone();
      tokio::spawn(async move {
        let mut outer_scope = ctx.scope(level.clone(), Setting::NoSync, Some(outer));
        barrier.wait().await;
        assert_eq!(outer_scope.is_nosync("tenants", None, None), outer);
        {
          let inner = outer_scope.scope(level.clone(), Setting::NoSync, Some(!outer));
          barrier.wait().await;
          assert_eq!(inner.is_nosync("tenants", None, None), !outer);
        }
        barrier.wait().await;
        assert_eq!(outer_scope.is_nosync("tenants", None, None), outer);
      })
    };

    for level in [Level::Process, Level::model("tenants")] {
      let a = run(true, level.clone());
      let b = run(false, level);
      a.await.unwrap();
      b.await.unwrap();
    }
  }
}
