use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Method, StatusCode};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::api_types::{parse_errors, unwrap_collection, unwrap_root};
use super::{Lookup, RemoteModel, RemoteQuery, RemoteResource};
use crate::error::{Error, Result};
use crate::model::{join_url_segments, segment_for};
use crate::record::FieldErrors;

/// Connection settings for a JSON REST resource.
#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
  /// Base URL, e.g. `http://example.com/api/`
  pub site: Url,
  /// Singular resource name, e.g. `account`
  pub element_name: String,
  /// Plural path segment; defaults to `<element_name>s`
  pub collection_name: Option<String>,
  pub primary_key: String,
  pub user: Option<String>,
  pub password: Option<String>,
  /// Outer bound for any single request
  pub timeout: Option<Duration>,
}

impl HttpRemoteConfig {
  pub fn new(site: Url, element_name: impl Into<String>) -> Self {
    Self {
      site,
      element_name: element_name.into(),
      collection_name: None,
      primary_key: "id".to_string(),
      user: None,
      password: None,
      timeout: None,
    }
  }

  pub fn collection_name(&self) -> String {
    self
      .collection_name
      .clone()
      .unwrap_or_else(|| format!("{}s", self.element_name))
  }
}

/// Remote model speaking JSON over HTTP, ActiveResource style.
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  config: Arc<HttpRemoteConfig>,
}

impl HttpRemote {
  pub fn new(config: HttpRemoteConfig) -> Result<Self> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = config.timeout {
      builder = builder.timeout(timeout);
    }
    let client = builder.build()?;

    Ok(Self {
      client,
      config: Arc::new(config),
    })
  }

  pub fn config(&self) -> &HttpRemoteConfig {
    &self.config
  }

  /// Absolute path for a route: relative routes live under the collection and get the format extension.
  pub fn expanded_path_for(&self, path: &str) -> String {
    if is_relative(path) {
      join_url_segments(&[
        self.config.site.path().to_string(),
        self.config.collection_name(),
        format!("{}.json", path),
      ])
    } else {
      path.to_string()
    }
  }

  fn collection_path(&self) -> String {
    join_url_segments(&[
      self.config.site.path().to_string(),
      format!("{}.json", self.config.collection_name()),
    ])
  }

  fn url_for(&self, path: &str) -> Result<Url> {
    if path.contains("://") {
      Ok(Url::parse(path)?)
    } else {
      Ok(self.config.site.join(path)?)
    }
  }

  fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
    let builder = self
      .client
      .request(method, url)
      .header(header::ACCEPT, "application/json");
    match &self.config.user {
      Some(user) => builder.basic_auth(user, self.config.password.as_ref()),
      None => builder,
    }
  }

  fn resource(&self, attributes: Map<String, Value>, path: Option<String>) -> HttpResource {
    HttpResource {
      remote: self.clone(),
      attributes,
      path,
      errors: FieldErrors::new(),
    }
  }
}

#[async_trait]
impl RemoteModel for HttpRemote {
  fn name(&self) -> &str {
    &self.config.element_name
  }

  fn primary_key(&self) -> &str {
    &self.config.primary_key
  }

  fn new_resource(&self) -> Box<dyn RemoteResource> {
    Box::new(self.resource(Map::new(), None))
  }

  async fn find_by(&self, query: &RemoteQuery) -> Result<Lookup> {
    let path = self.expanded_path_for(&query.path);
    let url = self.url_for(&path)?;
    info!("[remotable:{}] GET {}", self.config.element_name, url);

    let mut request = self.request(Method::GET, url);
    if let Some(since) = query.if_modified_since {
      request = request.header(header::IF_MODIFIED_SINCE, http_date(since));
    }

    let response = request.send().await?;
    match response.status() {
      StatusCode::NOT_FOUND => Ok(Lookup::NotFound),
      StatusCode::NOT_MODIFIED => Ok(Lookup::NotModified),
      status if status.is_success() => {
        let body: Value = response.json().await?;
        let attributes = unwrap_root(body, &self.config.element_name).ok_or_else(|| {
          Error::Http {
            status: status.as_u16(),
            message: format!("GET {} did not return an object", path),
          }
        })?;
        Ok(Lookup::Found(Box::new(self.resource(attributes, Some(path)))))
      }
      status => {
        let body = response.text().await.unwrap_or_default();
        Err(Error::from_status(status.as_u16(), format!("GET {}: {}", path, body)))
      }
    }
  }

  async fn all_by(&self, query: &RemoteQuery) -> Result<Vec<Box<dyn RemoteResource>>> {
    let path = if query.path.is_empty() {
      self.collection_path()
    } else {
      self.expanded_path_for(&query.path)
    };
    let url = self.url_for(&path)?;
    info!("[remotable:{}] GET {} (list)", self.config.element_name, url);

    let response = self.request(Method::GET, url).send().await?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(Error::from_status(status.as_u16(), format!("GET {}: {}", path, body)));
    }

    let body: Value = response.json().await?;
    let collection_name = self.config.collection_name();
    Ok(
      unwrap_collection(body, &collection_name, &self.config.element_name)
        .into_iter()
        .map(|attributes| Box::new(self.resource(attributes, None)) as Box<dyn RemoteResource>)
        .collect(),
    )
  }
}

/// A resource fetched from or about to be written to an [`HttpRemote`].
///
/// A resource found through a route keeps that path and writes back to it.
#[derive(Clone)]
pub struct HttpResource {
  remote: HttpRemote,
  attributes: Map<String, Value>,
  path: Option<String>,
  errors: FieldErrors,
}

impl std::fmt::Debug for HttpResource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HttpResource")
      .field("attributes", &self.attributes)
      .field("path", &self.path)
      .field("errors", &self.errors)
      .finish_non_exhaustive()
  }
}

impl HttpResource {
  fn id(&self) -> Option<&Value> {
    self
      .attributes
      .get(&self.remote.config.primary_key)
      .filter(|v| !v.is_null())
  }

  /// Canonical element path: the path it was found at, else derived from its id.
  fn element_path(&self) -> Option<String> {
    if let Some(path) = &self.path {
      return Some(path.clone());
    }
    self
      .id()
      .map(|id| self.remote.expanded_path_for(&urlencoding::encode(&segment_for(id))))
  }
}

#[async_trait]
impl RemoteResource for HttpResource {
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
    let (method, path) = match self.element_path() {
      Some(path) => (Method::PUT, path),
      None => (Method::POST, self.remote.collection_path()),
    };
    let url = self.remote.url_for(&path)?;
    info!("[remotable:{}] {} {}", self.remote.config.element_name, method, url);

    let response = self
      .remote
      .request(method.clone(), url)
      .json(&self.attributes)
      .send()
      .await?;

    let status = response.status();
    if status == StatusCode::UNPROCESSABLE_ENTITY {
      let body = response.text().await.unwrap_or_default();
      self.errors = parse_errors(&body);
      debug!("{} {} rejected: {}", method, path, self.errors);
      return Ok(false);
    }
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(Error::from_status(
        status.as_u16(),
        format!("{} {}: {}", method, path, body),
      ));
    }

    self.errors.clear();
    let body = response.text().await?;
    if !body.trim().is_empty() {
      let value: Value = serde_json::from_str(&body)?;
      if let Some(attributes) = unwrap_root(value, &self.remote.config.element_name) {
        self.attributes.extend(attributes);
      }
    }
    if method == Method::POST {
      self.path = self.element_path();
    }
    Ok(true)
  }

  async fn destroy(&mut self) -> Result<()> {
    let path = self.element_path().ok_or_else(|| {
      Error::NotFound(format!(
        "{} without an id has nothing to destroy",
        self.remote.config.element_name
      ))
    })?;
    let url = self.remote.url_for(&path)?;
    info!("[remotable:{}] DELETE {}", self.remote.config.element_name, url);

    let response = self.remote.request(Method::DELETE, url).send().await?;
    let status = response.status();
    if status.is_success() {
      return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::from_status(
      status.as_u16(),
      format!("DELETE {}: {}", path, body),
    ))
  }
}

fn is_relative(path: &str) -> bool {
  !(path.starts_with('/') || path.contains("://"))
}

/// RFC 7231 IMF-fixdate.
fn http_date(time: DateTime<Utc>) -> String {
  time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
