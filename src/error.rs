//! Failure classification and the bounded retry policy.
//!
//! Every failed write ends up here: the classifier turns a raw
//! [`RemoteError`] into one of five kinds, and the policy decides whether the
//! pipeline may retry on its own and how long to wait before doing so.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::key::ResourceKey;
use crate::remote::RemoteError;

/// The fixed failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
  /// Transport-level trouble: timeouts, connection failures, gateway errors.
  Network,
  /// The payload itself was rejected; retrying cannot change the outcome.
  Validation,
  /// Version mismatch or constraint violation; needs an explicit decision.
  Conflict,
  /// Missing or invalid credentials.
  Unauthorized,
  /// Anything unanticipated. Surfaced as-is, never masked as transient.
  Unknown,
}

impl ErrorKind {
  /// Whether this kind may be retried at all. Conflict retries happen only
  /// through an explicit resolver action, never automatically.
  pub fn retryable(&self) -> bool {
    matches!(self, ErrorKind::Network | ErrorKind::Conflict)
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ErrorKind::Network => "network",
      ErrorKind::Validation => "validation",
      ErrorKind::Conflict => "conflict",
      ErrorKind::Unauthorized => "unauthorized",
      ErrorKind::Unknown => "unknown",
    };
    f.write_str(s)
  }
}

/// Classify a raw backend failure. First match wins, in taxonomy order:
/// network, validation, conflict, unauthorized, unknown.
pub fn classify(err: &RemoteError) -> ErrorKind {
  let msg = err.message.to_lowercase();

  let status_is = |codes: &[u16]| err.status.map(|s| codes.contains(&s)).unwrap_or(false);
  let msg_has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

  if status_is(&[408, 429, 502, 503, 504])
    || msg_has(&["timeout", "timed out", "network", "connection", "unreachable", "offline"])
  {
    ErrorKind::Network
  } else if status_is(&[400, 422]) || msg_has(&["validation", "invalid", "required field", "schema"]) {
    ErrorKind::Validation
  } else if status_is(&[409, 412])
    || msg_has(&["conflict", "version mismatch", "duplicate", "constraint", "precondition"])
  {
    ErrorKind::Conflict
  } else if status_is(&[401, 403]) || msg_has(&["unauthorized", "forbidden", "token", "credential"]) {
    ErrorKind::Unauthorized
  } else {
    ErrorKind::Unknown
  }
}

/// Retry limits and backoff shape per error kind.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Automatic retries for `network` failures.
  pub max_network_retries: u32,
  /// Delay before the first network retry; grows by `backoff_multiplier`.
  pub backoff_base: Duration,
  pub backoff_multiplier: f64,
  /// Resubmissions allowed through the resolver for one conflict.
  pub max_conflict_retries: u32,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_network_retries: 4,
      backoff_base: Duration::from_secs(1),
      backoff_multiplier: 2.0,
      max_conflict_retries: 2,
    }
  }
}

impl RetryPolicy {
  pub fn max_retries(&self, kind: ErrorKind) -> u32 {
    match kind {
      ErrorKind::Network => self.max_network_retries,
      ErrorKind::Conflict => self.max_conflict_retries,
      _ => 0,
    }
  }

  /// Delay before retry number `attempt` (0-based). `None` means the kind is
  /// never delayed-and-retried automatically; conflicts retry with no delay,
  /// but only when the resolver asks.
  pub fn backoff(&self, kind: ErrorKind, attempt: u32) -> Option<Duration> {
    match kind {
      ErrorKind::Network => {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        Some(self.backoff_base.mul_f64(factor))
      }
      ErrorKind::Conflict => Some(Duration::ZERO),
      _ => None,
    }
  }
}

/// The classified failure state attached to a key after a failed operation.
///
/// Created on failure, cleared by the next successful operation or an
/// explicit dismissal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorState {
  pub kind: ErrorKind,
  pub message: String,
  pub retry_count: u32,
  pub max_retries: u32,
}

impl ErrorState {
  pub fn new(kind: ErrorKind, message: impl Into<String>, policy: &RetryPolicy) -> Self {
    Self {
      kind,
      message: message.into(),
      retry_count: 0,
      max_retries: policy.max_retries(kind),
    }
  }

  pub fn can_retry(&self) -> bool {
    self.kind.retryable() && self.retry_count < self.max_retries
  }

  pub fn record_attempt(&mut self) {
    self.retry_count += 1;
  }
}

/// Errors surfaced by the sync client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
  /// The write failed terminally and the cache was rolled back.
  #[error("{kind} failure after {attempts} attempt(s): {message}")]
  Mutation {
    kind: ErrorKind,
    attempts: u32,
    message: String,
  },
  /// A newer mutation on the same key took over; this one was discarded.
  #[error("mutation on {key} superseded by a newer one")]
  Superseded { key: ResourceKey },
  /// A refetch failed with no cached value to fall back on.
  #[error("{kind} failure fetching {key}: {message}")]
  Fetch {
    kind: ErrorKind,
    key: ResourceKey,
    message: String,
  },
  /// Resolving a conflict failed. Terminal, never retried automatically.
  #[error("conflict resolution on {key} failed: {message}")]
  Resolution { key: ResourceKey, message: String },
}
