//! Result types describing where a synced record came from.

use chrono::{DateTime, Utc};

/// Result of a lookup, including the record and how it was obtained.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: SyncSource,
  /// When the data next needs a refresh
  pub expires_at: Option<DateTime<Utc>>,
}

impl<T> Fetched<T> {
  pub fn new(data: T, source: SyncSource, expires_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source,
      expires_at,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
    Fetched {
      data: f(self.data),
      source: self.source,
      expires_at: self.expires_at,
    }
  }

  /// Whether serving this result involved a remote round trip that succeeded.
  pub fn is_remote(&self) -> bool {
    matches!(
      self.source,
      SyncSource::Pulled | SyncSource::NotModified | SyncSource::Remote
    )
  }
}

/// Indicates where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSource {
  /// Local copy, not yet expired
  Local,
  /// Local copy was expired and has been refreshed from the remote side
  Pulled,
  /// Local copy was expired; the remote side reported it unchanged
  NotModified,
  /// Local copy was expired, refresh failed softly, served as-is
  Stale,
  /// No local copy existed; created from the remote resource
  Remote,
  /// Remote access suppressed by no-sync
  NoSync,
}

/// What a pull did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
  /// No remote call: no-sync, or no key value to address the remote side
  Skipped,
  /// Remote data merged and expiry reset
  Pulled,
  /// Conditional fetch answered unchanged; expiry reset only
  NotModified,
  /// Remote counterpart is gone and the local record was removed
  Destroyed,
}
