//! Error taxonomy for sync operations.

use crate::record::FieldErrors;

/// Result type for remotable operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reconciling local records with their remote counterparts.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The remote side has no resource at the requested address
  #[error("Remote resource not found: {0}")]
  NotFound(String),

  /// A finder turned up nothing, neither locally nor remotely
  #[error("Record not found: {0}")]
  RecordNotFound(String),

  /// Local or remote validation rejected a write
  #[error("Validation failed: {0}")]
  Validation(FieldErrors),

  #[error("Remote request timed out: {0}")]
  Timeout(String),

  #[error("Remote service unavailable: {0}")]
  ServiceUnavailable(String),

  #[error("Network error: {0}")]
  Network(String),

  #[error("TLS error: {0}")]
  Tls(String),

  /// Any other unsuccessful HTTP status
  #[error("Remote request failed with status {status}: {message}")]
  Http { status: u16, message: String },

  /// Model setup is inconsistent (unresolvable key, unknown attribute, ...)
  #[error("Configuration error: {0}")]
  Configuration(String),

  /// Route placeholders and supplied key values disagree
  #[error("Route error: {0}")]
  Route(String),

  #[error("Storage error: {0}")]
  Storage(String),

  #[error(transparent)]
  Sqlite(#[from] rusqlite::Error),

  #[error(transparent)]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Url(#[from] url::ParseError),
}

impl Error {
  /// Whether a read-refresh may swallow this error and serve stale data.
  pub fn is_soft(&self) -> bool {
    matches!(
      self,
      Error::Timeout(_) | Error::ServiceUnavailable(_) | Error::Network(_) | Error::Tls(_)
    )
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, Error::NotFound(_))
  }

  /// Map an HTTP status onto the taxonomy. 503 and 504 get their own kinds.
  pub fn from_status(status: u16, message: impl Into<String>) -> Self {
    let message = message.into();
    match status {
      404 => Error::NotFound(message),
      503 => Error::ServiceUnavailable(message),
      504 => Error::Timeout(message),
      _ => Error::Http { status, message },
    }
  }
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      return Error::Timeout(err.to_string());
    }
    if let Some(status) = err.status() {
      return Error::from_status(status.as_u16(), err.to_string());
    }
    if is_tls_failure(&err) {
      return Error::Tls(err.to_string());
    }
    if err.is_connect() || err.is_request() {
      return Error::Network(err.to_string());
    }
    Error::Http {
      status: 0,
      message: err.to_string(),
    }
  }
}

/// reqwest folds handshake failures into connect errors, so walk the source chain.
fn is_tls_failure(err: &(dyn std::error::Error + 'static)) -> bool {
  let mut source = Some(err);
  while let Some(e) = source {
    let text = e.to_string().to_lowercase();
    if text.contains("certificate") || text.contains("tls") || text.contains("handshake") {
      return true;
    }
    source = e.source();
  }
  false
}
