//! Remote key resolution and the finder registry.

use serde_json::Value;

use super::attributes::AttributeMap;
use super::route::Route;
use crate::error::{Error, Result};

/// The attribute(s) identifying a remote resource, on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteKey {
  remote: Vec<String>,
  local: Vec<String>,
}

impl RemoteKey {
  /// Resolve the key from an explicit configuration or the remote primary key.
  ///
  /// An explicit key must name mapped remote attributes. Without one, the
  /// remote primary key is used, but only if it is part of the map.
  pub fn resolve(explicit: &[String], primary_key: &str, map: &AttributeMap) -> Result<Self> {
    let remote: Vec<String> = if explicit.is_empty() {
      if !map.has_remote(primary_key) {
        return Err(Error::Configuration(format!(
          "no remote key supplied and '{}' is not a remote attribute",
          primary_key
        )));
      }
      vec![primary_key.to_string()]
    } else {
      if let Some(unknown) = explicit.iter().find(|k| !map.has_remote(k)) {
        return Err(Error::Configuration(format!(
          "'{}' is not the name of a remote attribute",
          unknown
        )));
      }
      explicit.to_vec()
    };

    let local = remote
      .iter()
      .map(|r| map.local_name_for(r).to_string())
      .collect();

    Ok(Self { remote, local })
  }

  pub fn remote(&self) -> &[String] {
    &self.remote
  }

  pub fn local(&self) -> &[String] {
    &self.local
  }

  pub fn is_composite(&self) -> bool {
    self.remote.len() > 1
  }

  /// Whether this key is exactly the remote primary identifier.
  pub fn is_primary(&self, primary_key: &str) -> bool {
    self.remote.len() == 1 && self.remote[0] == primary_key
  }
}

/// How to look a record up remotely by a given tuple of local attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finder {
  pub local_keys: Vec<String>,
  pub remote_keys: Vec<String>,
  pub route: Route,
}

impl Finder {
  pub fn new(local_keys: Vec<String>, map: &AttributeMap, route: Route) -> Self {
    let remote_keys = local_keys
      .iter()
      .map(|l| map.remote_name_for(l).to_string())
      .collect();
    Self {
      local_keys,
      remote_keys,
      route,
    }
  }

  /// Render the finder's route for values given in `local_keys` order.
  pub fn path_for(&self, values: &[Value]) -> Result<String> {
    self.route.render(&self.local_keys, values)
  }

  fn covers(&self, names: &[&str]) -> bool {
    names.len() == self.local_keys.len() && names.iter().all(|n| self.local_keys.iter().any(|k| k == n))
  }
}

/// Finders keyed by the set of local attribute names they look up.
#[derive(Debug, Clone, Default)]
pub struct FinderRegistry {
  finders: Vec<Finder>,
}

impl FinderRegistry {
  /// Register a finder, replacing any existing one for the same attributes.
  pub fn register(&mut self, finder: Finder) {
    let names: Vec<&str> = finder.local_keys.iter().map(String::as_str).collect();
    match self.finders.iter().position(|f| f.covers(&names)) {
      Some(i) => self.finders[i] = finder,
      None => self.finders.push(finder),
    }
  }

  /// Register a finder unless one already exists for the same attributes.
  pub fn register_default(&mut self, finder: Finder) {
    let names: Vec<&str> = finder.local_keys.iter().map(String::as_str).collect();
    if self.lookup(&names).is_none() {
      self.finders.push(finder);
    }
  }

  /// Finder for exactly this set of local attribute names, in any order.
  pub fn lookup(&self, names: &[&str]) -> Option<&Finder> {
    self.finders.iter().find(|f| f.covers(names))
  }

  pub fn iter(&self) -> impl Iterator<Item = &Finder> {
    self.finders.iter()
  }
}
