//! Conflict records and the strategies an operator can pick to settle one.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::key::ResourceKey;
use crate::model::EntityValue;
use crate::remote::VersionMarker;

/// A detected divergence between the local edit and the server's current
/// version of the same record.
///
/// Exists only while the operator's decision is pending and is consumed
/// exactly once by [`SyncClient::resolve_conflict`], which replaces it with a
/// single committed value.
///
/// [`SyncClient::resolve_conflict`]: crate::client::SyncClient::resolve_conflict
#[derive(Debug, Clone)]
pub struct ConflictRecord {
  pub key: ResourceKey,
  /// The local candidate: the optimistic value still sitting in the cache.
  pub local_value: EntityValue,
  /// The server's current value, carried by the conflict signal.
  pub remote_value: EntityValue,
  pub local_modified_at: DateTime<Utc>,
  pub remote_modified_at: DateTime<Utc>,
  /// The server's current marker, cached so `remote` resolution needs no
  /// extra round trip.
  pub remote_marker: VersionMarker,
  /// Which mutation produced this conflict.
  pub(crate) mutation_id: u64,
}

/// How to settle a conflict. Exactly one strategy is applied, once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStrategy {
  /// Re-submit the local value as an unconditional overwrite.
  Local,
  /// Discard the local edit and adopt the server's value.
  Remote,
  /// Field-by-field combination of both sides. Can silently combine
  /// unrelated edits; surfaced to the operator as not recommended.
  Merge,
}

impl ResolveStrategy {
  /// Whether the UI should present this strategy without a warning.
  pub fn recommended(&self) -> bool {
    !matches!(self, ResolveStrategy::Merge)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ResolveStrategy::Local => "local",
      ResolveStrategy::Remote => "remote",
      ResolveStrategy::Merge => "merge",
    }
  }
}

impl fmt::Display for ResolveStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
