//! In-memory key-addressed store with staleness and eviction horizons.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;

use super::persist::{NoopStorage, SnapshotStorage};
use crate::key::{KeySelector, ResourceKey};
use crate::model::EntityValue;
use crate::remote::VersionMarker;

/// One cached resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub value: EntityValue,
  /// The version marker the server attached, if the value was confirmed.
  /// Staged (optimistic) values keep the marker of the value they replaced.
  pub marker: Option<VersionMarker>,
  pub fetched_at: DateTime<Utc>,
  pub stale_at: DateTime<Utc>,
  pub evict_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
    now >= self.stale_at
  }

  pub fn is_evictable(&self, now: DateTime<Utc>) -> bool {
    now >= self.evict_at
  }
}

/// Snapshot handed out by [`CacheStore::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cached {
  pub value: EntityValue,
  pub marker: Option<VersionMarker>,
  pub is_stale: bool,
  pub fetched_at: DateTime<Utc>,
}

/// The shared read cache. At most one entry per key; entry-level writes are
/// last-write-wins, ordering across writers is the mutation pipeline's job.
///
/// Confirmed values are written through to the snapshot storage so they
/// survive a restart; staged (optimistic) values never are.
pub struct CacheStore<S = NoopStorage> {
  entries: Mutex<HashMap<ResourceKey, CacheEntry>>,
  storage: S,
  stale_after: Duration,
  evict_after: Duration,
}

impl CacheStore<NoopStorage> {
  /// A purely in-memory store.
  pub fn in_memory(stale_after: Duration, evict_after: Duration) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      storage: NoopStorage,
      stale_after,
      evict_after,
    }
  }
}

impl<S: SnapshotStorage> CacheStore<S> {
  /// A store backed by `storage`, warm-loaded from whatever it holds.
  ///
  /// Restored entries keep their original `fetched_at` (so most arrive
  /// already stale and will refetch), but their eviction horizon restarts
  /// from now.
  pub fn with_storage(storage: S, stale_after: Duration, evict_after: Duration) -> Self {
    let now = Utc::now();
    let mut entries = HashMap::new();
    match storage.load_all() {
      Ok(persisted) => {
        for p in persisted {
          entries.insert(
            p.key,
            CacheEntry {
              value: p.value,
              marker: p.marker,
              fetched_at: p.fetched_at,
              stale_at: p.fetched_at + stale_after,
              evict_at: now + evict_after,
            },
          );
        }
      }
      Err(e) => warn!(error = %e, "failed to warm cache from snapshot storage"),
    }
    Self {
      entries: Mutex::new(entries),
      storage,
      stale_after,
      evict_after,
    }
  }

  /// Look up a key. Never blocks and never fetches; an absent result is the
  /// caller's cue to take the fetch path.
  pub fn get(&self, key: &ResourceKey) -> Option<Cached> {
    let entries = self.entries.lock();
    let entry = entries.get(key)?;
    Some(Cached {
      value: entry.value.clone(),
      marker: entry.marker,
      is_stale: entry.is_stale(Utc::now()),
      fetched_at: entry.fetched_at,
    })
  }

  /// The raw entry for a key, timestamps and all. Used by the pipeline to
  /// take the pre-mutation snapshot it may later [`restore`](Self::restore).
  pub fn snapshot(&self, key: &ResourceKey) -> Option<CacheEntry> {
    self.entries.lock().get(key).cloned()
  }

  /// Store a server-confirmed value: unconditional overwrite, fresh
  /// horizons, written through to snapshot storage.
  pub fn set(&self, key: &ResourceKey, value: EntityValue, marker: VersionMarker) {
    let now = Utc::now();
    let entry = CacheEntry {
      value,
      marker: Some(marker),
      fetched_at: now,
      stale_at: now + self.stale_after,
      evict_at: now + self.evict_after,
    };
    if let Err(e) = self
      .storage
      .save(key, &entry.value, entry.marker.as_ref(), entry.fetched_at)
    {
      // Durability under the cache is best-effort; the in-memory write
      // still proceeds.
      warn!(%key, error = %e, "snapshot write failed");
    }
    self.entries.lock().insert(key.clone(), entry);
  }

  /// Stage a local-only value (an optimistic projection). Fresh horizons,
  /// carries the supplied marker, never persisted.
  pub fn stage(&self, key: &ResourceKey, value: EntityValue, marker: Option<VersionMarker>) {
    let now = Utc::now();
    self.entries.lock().insert(
      key.clone(),
      CacheEntry {
        value,
        marker,
        fetched_at: now,
        stale_at: now + self.stale_after,
        evict_at: now + self.evict_after,
      },
    );
  }

  /// Put a snapshot back exactly as it was taken. The rollback primitive.
  pub fn restore(&self, key: &ResourceKey, entry: CacheEntry) {
    self.entries.lock().insert(key.clone(), entry);
  }

  /// Drop a key entirely (rollback of a mutation that created the entry).
  pub fn remove(&self, key: &ResourceKey) {
    self.entries.lock().remove(key);
    if let Err(e) = self.storage.remove(key) {
      warn!(%key, error = %e, "snapshot remove failed");
    }
  }

  /// Mark every entry matching `selector` stale. The value stays in place,
  /// so readers keep a flicker-free previous value while a refetch is due.
  /// Returns how many entries were marked.
  pub fn invalidate(&self, selector: &KeySelector) -> usize {
    let now = Utc::now();
    let mut entries = self.entries.lock();
    let mut marked = 0;
    for (key, entry) in entries.iter_mut() {
      if selector.matches(key) && !entry.is_stale(now) {
        entry.stale_at = now;
        marked += 1;
      }
    }
    marked
  }

  /// Mark a single key stale.
  pub fn invalidate_key(&self, key: &ResourceKey) -> bool {
    let now = Utc::now();
    let mut entries = self.entries.lock();
    match entries.get_mut(key) {
      Some(entry) => {
        entry.stale_at = now.min(entry.stale_at);
        true
      }
      None => false,
    }
  }

  /// Drop entries past their eviction horizon. `is_active` lets the caller
  /// shield keys that still have readers or an in-flight mutation.
  /// Returns how many entries were evicted.
  pub fn sweep<F>(&self, is_active: F) -> usize
  where
    F: Fn(&ResourceKey) -> bool,
  {
    let now = Utc::now();
    let mut entries = self.entries.lock();
    let doomed: Vec<ResourceKey> = entries
      .iter()
      .filter(|(key, entry)| entry.is_evictable(now) && !is_active(key))
      .map(|(key, _)| key.clone())
      .collect();
    for key in &doomed {
      entries.remove(key);
      if let Err(e) = self.storage.remove(key) {
        warn!(%key, error = %e, "snapshot remove failed");
      }
    }
    doomed.len()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.lock().is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::key::{EntityKind, Period};
  use crate::model::{EntityValue, SummaryRecord};

  fn key(kind: EntityKind) -> ResourceKey {
    ResourceKey::new(kind, "family", Period::new(2025, 9))
  }

  fn summary(net: i64) -> EntityValue {
    EntityValue::Summary(SummaryRecord {
      net_balance: net,
      ..SummaryRecord::default()
    })
  }

  fn store() -> CacheStore {
    CacheStore::in_memory(Duration::minutes(5), Duration::hours(24))
  }

  #[test]
  fn get_misses_then_hits() {
    let cache = store();
    let k = key(EntityKind::Summary);
    assert!(cache.get(&k).is_none());

    cache.set(&k, summary(10), VersionMarker::now());
    let hit = cache.get(&k).unwrap();
    assert_eq!(hit.value, summary(10));
    assert!(!hit.is_stale);
    assert!(hit.marker.is_some());
  }

  #[test]
  fn invalidate_keeps_the_value_but_marks_it_stale() {
    let cache = store();
    let k = key(EntityKind::Income);
    cache.set(&k, summary(1), VersionMarker::now());

    let marked = cache.invalidate(&KeySelector::of_kind(EntityKind::Income));
    assert_eq!(marked, 1);

    let hit = cache.get(&k).unwrap();
    assert!(hit.is_stale);
    assert_eq!(hit.value, summary(1));
  }

  #[test]
  fn invalidate_is_scoped_by_selector() {
    let cache = store();
    cache.set(&key(EntityKind::Income), summary(1), VersionMarker::now());
    cache.set(&key(EntityKind::Expense), summary(2), VersionMarker::now());

    cache.invalidate(&KeySelector::of_kind(EntityKind::Income));
    assert!(cache.get(&key(EntityKind::Income)).unwrap().is_stale);
    assert!(!cache.get(&key(EntityKind::Expense)).unwrap().is_stale);
  }

  #[test]
  fn restore_round_trips_the_exact_entry() {
    let cache = store();
    let k = key(EntityKind::Summary);
    cache.set(&k, summary(7), VersionMarker::now());
    let snap = cache.snapshot(&k).unwrap();

    cache.stage(&k, summary(99), snap.marker);
    assert_eq!(cache.get(&k).unwrap().value, summary(99));

    cache.restore(&k, snap.clone());
    assert_eq!(cache.snapshot(&k).unwrap(), snap);
  }

  #[test]
  fn sweep_only_evicts_past_the_horizon() {
    let cache = CacheStore::in_memory(Duration::minutes(5), Duration::zero());
    let fresh = CacheStore::in_memory(Duration::minutes(5), Duration::hours(1));
    let k = key(EntityKind::Account);

    cache.set(&k, summary(1), VersionMarker::now());
    fresh.set(&k, summary(1), VersionMarker::now());

    assert_eq!(cache.sweep(|_| false), 1);
    assert!(cache.get(&k).is_none());
    assert_eq!(fresh.sweep(|_| false), 0);
    assert!(fresh.get(&k).is_some());
  }

  #[test]
  fn storage_backed_store_restores_confirmed_values_only() {
    use crate::cache::persist::SqliteStorage;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshots.db");
    let confirmed = key(EntityKind::Income);
    let staged = key(EntityKind::Expense);
    let marker = VersionMarker::now();

    let first = CacheStore::with_storage(
      SqliteStorage::open_at(&path).unwrap(),
      Duration::minutes(5),
      Duration::hours(24),
    );
    first.set(&confirmed, summary(42), marker);
    first.stage(&staged, summary(7), None);
    let written = first.snapshot(&confirmed).unwrap();
    drop(first);

    let reopened_at = Utc::now();
    let rebuilt = CacheStore::with_storage(
      SqliteStorage::open_at(&path).unwrap(),
      Duration::minutes(5),
      Duration::hours(24),
    );

    // The confirmed value comes back under its original fetch time, so its
    // staleness horizon keeps counting from the first fetch; the eviction
    // horizon restarts from load time.
    let restored = rebuilt.snapshot(&confirmed).unwrap();
    assert_eq!(restored.value, written.value);
    assert_eq!(restored.marker, Some(marker));
    assert_eq!(restored.fetched_at, written.fetched_at);
    assert_eq!(restored.stale_at, restored.fetched_at + Duration::minutes(5));
    assert!(restored.evict_at >= reopened_at + Duration::hours(24));

    // The staged (optimistic) value was never persisted.
    assert!(rebuilt.get(&staged).is_none());
  }

  #[test]
  fn sweep_skips_active_keys() {
    let cache = CacheStore::in_memory(Duration::minutes(5), Duration::zero());
    let k = key(EntityKind::Account);
    cache.set(&k, summary(1), VersionMarker::now());

    assert_eq!(cache.sweep(|candidate| candidate == &k), 0);
    assert!(cache.get(&k).is_some());
  }
}
