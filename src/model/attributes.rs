//! Bidirectional local <-> remote attribute naming.

use std::collections::BTreeSet;

/// Pairs of (remote name, local name) in declaration order.
///
/// Names that are not mapped translate to themselves in both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
  pairs: Vec<(String, String)>,
}

impl AttributeMap {
  /// Build a map from identity-mapped local names plus `(local, remote)` overrides.
  ///
  /// An override replaces the identity entry for the same local name; an
  /// override for a name not in `locals` is appended.
  pub fn new<L, O, S1, S2, S3>(locals: L, overrides: O) -> Self
  where
    L: IntoIterator<Item = S1>,
    O: IntoIterator<Item = (S2, S3)>,
    S1: Into<String>,
    S2: Into<String>,
    S3: Into<String>,
  {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for local in locals {
      let local = local.into();
      if !pairs.iter().any(|(_, l)| *l == local) {
        pairs.push((local.clone(), local));
      }
    }

    for (local, remote) in overrides {
      let (local, remote) = (local.into(), remote.into());
      match pairs.iter_mut().find(|(_, l)| *l == local) {
        Some(pair) => pair.0 = remote,
        None => pairs.push((remote, local)),
      }
    }

    Self { pairs }
  }

  pub fn remote_name_for<'a>(&'a self, local: &'a str) -> &'a str {
    self
      .pairs
      .iter()
      .find(|(_, l)| l == local)
      .map(|(r, _)| r.as_str())
      .unwrap_or(local)
  }

  pub fn local_name_for<'a>(&'a self, remote: &'a str) -> &'a str {
    self
      .pairs
      .iter()
      .find(|(r, _)| r == remote)
      .map(|(_, l)| l.as_str())
      .unwrap_or(remote)
  }

  pub fn remote_names(&self) -> BTreeSet<&str> {
    self.pairs.iter().map(|(r, _)| r.as_str()).collect()
  }

  pub fn local_names(&self) -> BTreeSet<&str> {
    self.pairs.iter().map(|(_, l)| l.as_str()).collect()
  }

  pub fn has_remote(&self, remote: &str) -> bool {
    self.pairs.iter().any(|(r, _)| r == remote)
  }

  pub fn has_local(&self, local: &str) -> bool {
    self.pairs.iter().any(|(_, l)| l == local)
  }

  /// (remote, local) pairs in declaration order.
  pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
    self.pairs.iter().map(|(r, l)| (r.as_str(), l.as_str()))
  }

  pub fn len(&self) -> usize {
    self.pairs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pairs.is_empty()
  }

  /// Remote names claimed by more than one local name.
  pub fn conflicts(&self) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    let mut conflicts = BTreeSet::new();
    for (remote, _) in &self.pairs {
      if !seen.insert(remote.as_str()) {
        conflicts.insert(remote.as_str());
      }
    }
    conflicts.into_iter().collect()
  }
}
