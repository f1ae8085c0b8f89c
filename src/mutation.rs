//! Bookkeeping for one in-flight write.

use crate::cache::CacheEntry;
use crate::conflict::ConflictRecord;
use crate::key::ResourceKey;
use crate::model::EntityValue;
use crate::remote::VersionMarker;

/// Where a mutation is in its lifecycle. `Applied` is the only non-terminal
/// state: the optimistic value is in the cache and the network has not
/// answered yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
  Applied,
  Committed,
  RolledBack,
  Conflicted,
}

impl MutationStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, MutationStatus::Applied)
  }
}

/// One write moving through the pipeline.
///
/// `previous` is the exact cache entry as it stood before the optimistic
/// apply (None when the mutation created the entry). It is owned by this
/// mutation alone and only ever used to roll back.
#[derive(Debug, Clone)]
pub struct PendingMutation {
  pub id: u64,
  pub key: ResourceKey,
  pub previous: Option<CacheEntry>,
  pub optimistic: EntityValue,
  pub status: MutationStatus,
}

impl PendingMutation {
  pub fn new(
    id: u64,
    key: ResourceKey,
    previous: Option<CacheEntry>,
    optimistic: EntityValue,
  ) -> Self {
    Self {
      id,
      key,
      previous,
      optimistic,
      status: MutationStatus::Applied,
    }
  }

  /// The marker the client last observed for this key, sent with the write
  /// so the server can detect divergence.
  pub fn expected_marker(&self) -> Option<VersionMarker> {
    self.previous.as_ref().and_then(|entry| entry.marker)
  }
}

/// What a finished `mutate` call hands back.
#[derive(Debug, Clone)]
pub enum MutationOutcome {
  /// The server confirmed the write; this is the committed value.
  Committed {
    value: EntityValue,
    marker: VersionMarker,
  },
  /// Local and remote diverged; the operator has to decide.
  Conflict(ConflictRecord),
}

impl MutationOutcome {
  pub fn is_committed(&self) -> bool {
    matches!(self, MutationOutcome::Committed { .. })
  }
}
