//! Route patterns for addressing remote resources by key.
//!
//! A route is a path with `:name` placeholders, e.g. `groups/:group_id/tenants/:slug`.
//! Rendering substitutes every placeholder named by the key with the
//! percent-encoded key value in one pass.

use regex::{Captures, Regex};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

use crate::error::{Error, Result};

/// `:name` placeholders, capturing the name
static PLACEHOLDER_PATTERN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
  pattern: String,
}

impl Route {
  pub fn new(pattern: impl Into<String>) -> Self {
    Self {
      pattern: pattern.into(),
    }
  }

  /// The route used when none is configured for a key.
  ///
  /// A key on the remote primary identifier is addressed directly (`:remote_id`),
  /// anything else through a `by_<key>` segment (`by_slug/:slug`). Composite
  /// keys chain their names: `by_group_id_and_slug/:group_id/:slug`.
  pub fn default_for<S: AsRef<str>>(local_keys: &[S], is_primary: bool) -> Self {
    let placeholders: Vec<String> = local_keys
      .iter()
      .map(|k| format!(":{}", k.as_ref()))
      .collect();

    if is_primary && local_keys.len() == 1 {
      return Self::new(placeholders.join("/"));
    }

    let names: Vec<&str> = local_keys.iter().map(AsRef::as_ref).collect();
    Self::new(format!("by_{}/{}", names.join("_and_"), placeholders.join("/")))
  }

  pub fn pattern(&self) -> &str {
    &self.pattern
  }

  /// Placeholder names in order of appearance.
  pub fn placeholders(&self) -> Vec<&str> {
    PLACEHOLDER_PATTERN
      .captures_iter(&self.pattern)
      .filter_map(|c| c.get(1).map(|m| m.as_str()))
      .collect()
  }

  /// Substitute `values` for the placeholders named by `key_names`.
  ///
  /// Fails when the number of values differs from the number of key names.
  pub fn render<S: AsRef<str>>(&self, key_names: &[S], values: &[Value]) -> Result<String> {
    if key_names.len() != values.len() {
      return Err(Error::Route(format!(
        "route '{}' expects {} key value(s), got {}",
        self.pattern,
        key_names.len(),
        values.len()
      )));
    }

    let rendered = PLACEHOLDER_PATTERN.replace_all(&self.pattern, |caps: &Captures| {
      let name = &caps[1];
      match key_names.iter().position(|k| k.as_ref() == name) {
        Some(i) => urlencoding::encode(&segment_for(&values[i])).into_owned(),
        None => caps[0].to_string(),
      }
    });

    Ok(rendered.into_owned())
  }
}

impl fmt::Display for Route {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.pattern)
  }
}

/// Render a route pattern in one call.
pub fn path_for<S: AsRef<str>>(pattern: &str, key_names: &[S], values: &[Value]) -> Result<String> {
  Route::new(pattern).render(key_names, values)
}

/// Plain string form of a key value, before encoding.
pub fn segment_for(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

/// Join URL segments with single slashes, keeping a leading slash on the first one.
pub fn join_url_segments<S: AsRef<str>>(segments: &[S]) -> String {
  let mut iter = segments.iter().map(AsRef::as_ref);
  let first = iter.next().unwrap_or("").trim_end_matches('/');
  let rest = iter
    .map(|s| s.trim_matches('/'))
    .filter(|s| !s.is_empty());
  std::iter::once(first)
    .chain(rest)
    .collect::<Vec<_>>()
    .join("/")
}
