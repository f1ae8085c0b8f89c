//! Contract with the persistence backend.
//!
//! The backend is a black box: submit a write, get back the confirmed value
//! and its version marker, or a conflict signal carrying the server's current
//! version so the detector needs no second round trip. Transport, routes and
//! auth all live behind this trait.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::ResourceKey;
use crate::model::EntityValue;

/// Opaque modification stamp for one stored entity.
///
/// Comparable for equality and order; nothing else about it is interpreted.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VersionMarker(DateTime<Utc>);

impl VersionMarker {
  pub fn now() -> Self {
    Self(Utc::now())
  }

  pub fn at(stamp: DateTime<Utc>) -> Self {
    Self(stamp)
  }

  pub fn timestamp(&self) -> DateTime<Utc> {
    self.0
  }
}

/// A raw failure reported by the backend, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
  /// HTTP-ish status code, when the transport produced one.
  pub status: Option<u16>,
  pub message: String,
}

impl RemoteError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      status: None,
      message: message.into(),
    }
  }

  pub fn with_status(status: u16, message: impl Into<String>) -> Self {
    Self {
      status: Some(status),
      message: message.into(),
    }
  }
}

/// A value the server vouches for, with its marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmed {
  pub value: EntityValue,
  pub marker: VersionMarker,
}

/// Returned instead of applying a blind overwrite when the submitted
/// `expected` marker no longer matches the server's current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSignal {
  /// The server's current version of the record.
  pub current: Confirmed,
}

/// Result of a write the backend accepted for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
  Committed(Confirmed),
  Conflict(ConflictSignal),
}

/// The persistence backend as seen by the sync core.
///
/// `submit` with `expected = None` is an unconditional overwrite (used by
/// conflict resolution); with `Some(marker)` the server must refuse the write
/// and answer with a [`ConflictSignal`] if its current marker differs.
#[allow(async_fn_in_trait)]
pub trait RemoteStore: Send + Sync {
  async fn submit(
    &self,
    key: &ResourceKey,
    payload: &EntityValue,
    expected: Option<&VersionMarker>,
  ) -> Result<SubmitOutcome, RemoteError>;

  async fn fetch(&self, key: &ResourceKey) -> Result<Confirmed, RemoteError>;

  /// Connectivity probe consulted before each automatic retry.
  async fn is_reachable(&self) -> bool {
    true
  }
}
