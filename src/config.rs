use color_eyre::{eyre::eyre, Result};
use remotable::{
  HttpRemote, HttpRemoteConfig, Level, Setting, SyncContext, SyncModel, Timeouts,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Record store location (defaults to the user's data directory)
  pub database: Option<PathBuf>,
  #[serde(default)]
  pub log: LogConfig,
  /// Process-level no-sync default
  pub nosync: Option<bool>,
  /// Process-level remote model validation default
  pub validate_models: Option<bool>,
  #[serde(default)]
  pub models: BTreeMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Filter directive used when RUST_LOG is unset, e.g. "info" or "remotable=debug"
  pub level: Option<String>,
  /// Write daily rolling log files here in addition to stderr
  pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
  /// Base URL of the remote API
  pub site: String,
  /// Singular remote resource name (defaults to the model name without a trailing "s")
  pub element_name: Option<String>,
  pub collection_name: Option<String>,
  #[serde(default = "default_primary_key")]
  pub primary_key: String,
  pub user: Option<String>,
  /// Environment variable holding the basic auth password
  pub password_env: Option<String>,
  /// Local attributes mapped to remote attributes of the same name
  #[serde(default)]
  pub attributes: Vec<String>,
  /// Local attribute -> remote attribute overrides
  #[serde(default)]
  pub remote_names: BTreeMap<String, String>,
  #[serde(default, deserialize_with = "deserialize_one_or_many")]
  pub remote_key: Vec<String>,
  pub remote_path: Option<String>,
  #[serde(default)]
  pub fetch_with: Vec<FinderConfig>,
  #[serde(default, deserialize_with = "deserialize_opt_duration")]
  pub expires_after: Option<Duration>,
  #[serde(default)]
  pub timeouts: TimeoutsConfig,
  pub validate_remote_model: Option<bool>,
  #[serde(default)]
  pub skip_validation_on_sync: bool,
  #[serde(default)]
  pub accepts_not_modified: bool,
  /// Local attributes that must not be blank
  #[serde(default)]
  pub required: Vec<String>,
  pub nosync: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinderConfig {
  #[serde(deserialize_with = "deserialize_one_or_many")]
  pub attributes: Vec<String>,
  pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeoutsConfig {
  #[serde(default, deserialize_with = "deserialize_opt_duration")]
  pub list: Option<Duration>,
  #[serde(default, deserialize_with = "deserialize_opt_duration")]
  pub fetch: Option<Duration>,
  #[serde(default, deserialize_with = "deserialize_opt_duration")]
  pub pull: Option<Duration>,
  #[serde(default, deserialize_with = "deserialize_opt_duration")]
  pub create: Option<Duration>,
  #[serde(default, deserialize_with = "deserialize_opt_duration")]
  pub update: Option<Duration>,
  #[serde(default, deserialize_with = "deserialize_opt_duration")]
  pub destroy: Option<Duration>,
}

fn default_primary_key() -> String {
  "id".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
  One(String),
  Many(Vec<String>),
}

fn deserialize_one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  Ok(match OneOrMany::deserialize(deserializer)? {
    OneOrMany::One(s) => vec![s],
    OneOrMany::Many(v) => v,
  })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
  Seconds(u64),
  Text(String),
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  match Option::<RawDuration>::deserialize(deserializer)? {
    None => Ok(None),
    Some(RawDuration::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
    Some(RawDuration::Text(text)) => parse_duration(&text)
      .map(Some)
      .map_err(serde::de::Error::custom),
  }
}

/// Parse "90s", "30m", "12h", "1d", "250ms" or bare seconds.
pub fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
  let text = text.trim();
  let split = text
    .find(|c: char| !c.is_ascii_digit())
    .unwrap_or(text.len());
  let (digits, unit) = text.split_at(split);
  let value: u64 = digits
    .parse()
    .map_err(|_| format!("invalid duration '{}'", text))?;

  let factor: u64 = match unit.trim() {
    "" | "s" => 1,
    "ms" => return Ok(Duration::from_millis(value)),
    "m" => 60,
    "h" => 60 * 60,
    "d" => 24 * 60 * 60,
    other => return Err(format!("unknown duration unit '{}' in '{}'", other, text)),
  };
  let secs = value
    .checked_mul(factor)
    .ok_or_else(|| format!("duration '{}' is out of range", text))?;
  Ok(Duration::from_secs(secs))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./remotable.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/remotable/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/remotable/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("remotable.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("remotable").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  pub fn model(&self, name: &str) -> Result<&ModelConfig> {
    self.models.get(name).ok_or_else(|| {
      let known: Vec<&str> = self.models.keys().map(String::as_str).collect();
      eyre!("Unknown model '{}' (configured: {})", name, known.join(", "))
    })
  }

  /// Process-level flags as configured.
  pub fn context(&self) -> SyncContext {
    let mut ctx = SyncContext::new();
    ctx.set(&Level::Process, Setting::NoSync, self.nosync);
    ctx.set(&Level::Process, Setting::ValidateModels, self.validate_models);
    ctx
  }
}

impl ModelConfig {
  pub fn sync_model(&self, name: &str) -> Result<SyncModel> {
    let defaults = Timeouts::default();
    let timeouts = Timeouts {
      list: self.timeouts.list.unwrap_or(defaults.list),
      fetch: self.timeouts.fetch.unwrap_or(defaults.fetch),
      pull: self.timeouts.pull.unwrap_or(defaults.pull),
      create: self.timeouts.create.unwrap_or(defaults.create),
      update: self.timeouts.update.unwrap_or(defaults.update),
      destroy: self.timeouts.destroy.unwrap_or(defaults.destroy),
    };

    let mut builder = SyncModel::builder(name)
      .attributes(self.attributes.iter().cloned())
      .primary_key(self.primary_key.clone())
      .remote_key(self.remote_key.iter().cloned())
      .timeouts(timeouts)
      .skip_validation_on_sync(self.skip_validation_on_sync)
      .accepts_not_modified(self.accepts_not_modified)
      .validates_presence_of(self.required.iter().cloned())
      .nosync(self.nosync)
      .validate_remote_model(self.validate_remote_model);

    for (local, remote) in &self.remote_names {
      builder = builder.map_attribute(local.clone(), remote.clone());
    }
    if let Some(path) = &self.remote_path {
      builder = builder.remote_path(path.clone());
    }
    for finder in &self.fetch_with {
      builder = match &finder.path {
        Some(path) => builder.fetch_with_route(finder.attributes.iter().cloned(), path.clone()),
        None => builder.fetch_with(finder.attributes.iter().cloned()),
      };
    }
    if let Some(lifetime) = self.expires_after {
      let lifetime = chrono::Duration::from_std(lifetime)
        .map_err(|e| eyre!("expires_after of model '{}' is out of range: {}", name, e))?;
      builder = builder.expires_after(lifetime);
    }

    Ok(builder.build()?)
  }

  pub fn remote(&self, name: &str) -> Result<HttpRemote> {
    let site = Url::parse(&self.site)
      .map_err(|e| eyre!("Invalid site '{}' for model '{}': {}", self.site, name, e))?;

    let password = match &self.password_env {
      Some(var) => Some(std::env::var(var).map_err(|_| {
        eyre!("Password for model '{}' not found. Set the {} environment variable.", name, var)
      })?),
      None => None,
    };

    let element_name = self
      .element_name
      .clone()
      .unwrap_or_else(|| name.strip_suffix('s').unwrap_or(name).to_string());

    let mut config = HttpRemoteConfig::new(site, element_name);
    config.collection_name = self.collection_name.clone();
    config.primary_key = self.primary_key.clone();
    config.user = self.user.clone();
    config.password = password;

    Ok(HttpRemote::new(config)?)
  }
}
