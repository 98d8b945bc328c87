//! Serde-deserializable shapes of remote response bodies.
//!
//! Remote APIs disagree on how validation errors come back, so several
//! layouts are accepted and normalised into [`FieldErrors`].

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::record::FieldErrors;

/// Field name used for messages that don't belong to one attribute.
pub const BASE: &str = "base";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Messages {
  One(String),
  Many(Vec<String>),
}

impl Messages {
  fn into_vec(self) -> Vec<String> {
    match self {
      Messages::One(message) => vec![message],
      Messages::Many(messages) => messages,
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorList {
  /// `{"errors": {"name": ["is already taken"]}}`
  ByField(BTreeMap<String, Messages>),
  /// `{"errors": [{"name": ["is already taken"]}]}`, only the first entry counts
  FieldList(Vec<BTreeMap<String, Messages>>),
  /// `{"errors": ["Name is already taken"]}`
  Full(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiErrors {
  Wrapped { errors: ErrorList },
  Bare(BTreeMap<String, Messages>),
}

/// Field errors from a rejected write's body, keyed by remote field name.
pub fn parse_errors(body: &str) -> FieldErrors {
  let Ok(parsed) = serde_json::from_str::<ApiErrors>(body) else {
    let mut errors = FieldErrors::new();
    if !body.trim().is_empty() {
      errors.add(BASE, body.trim());
    }
    return errors;
  };

  let by_field = match parsed {
    ApiErrors::Wrapped {
      errors: ErrorList::ByField(map),
    }
    | ApiErrors::Bare(map) => map,
    ApiErrors::Wrapped {
      errors: ErrorList::FieldList(list),
    } => list.into_iter().next().unwrap_or_default(),
    ApiErrors::Wrapped {
      errors: ErrorList::Full(messages),
    } => BTreeMap::from([(BASE.to_string(), Messages::Many(messages))]),
  };

  by_field
    .into_iter()
    .map(|(field, messages)| (field, messages.into_vec()))
    .collect()
}

/// Strip a single `{"<element>": {...}}` root wrapper, if present.
pub fn unwrap_root(value: Value, element_name: &str) -> Option<Map<String, Value>> {
  match value {
    Value::Object(mut map) => {
      if map.len() == 1 && map.get(element_name).map(Value::is_object).unwrap_or(false) {
        if let Some(Value::Object(inner)) = map.remove(element_name) {
          return Some(inner);
        }
      }
      Some(map)
    }
    _ => None,
  }
}

/// A collection body, either a bare array or wrapped in `{"<collection>": [...]}`.
pub fn unwrap_collection(value: Value, collection_name: &str, element_name: &str) -> Vec<Map<String, Value>> {
  let items = match value {
    Value::Array(items) => items,
    Value::Object(mut map) => match map.remove(collection_name) {
      Some(Value::Array(items)) => items,
      _ => Vec::new(),
    },
    _ => Vec::new(),
  };

  items
    .into_iter()
    .filter_map(|item| unwrap_root(item, element_name))
    .collect()
}
