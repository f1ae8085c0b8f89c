//! The sync client: stale-tolerant reads, optimistic mutations with exact
//! rollback, and operator-driven conflict resolution over the read cache.
//!
//! Concurrency model: one logical thread of control per key. Each key owns an
//! async gate that serializes its mutations (and cache-writing fetches);
//! different keys are fully independent. The network round trip is the only
//! suspension point. A newer mutation on a key supersedes an older one still
//! in flight: the older rolls back and its late response is discarded, never
//! written to the cache (guarded by the latest-mutation-id check).

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::cache::{CacheStore, NoopStorage, SnapshotStorage};
use crate::config::SyncConfig;
use crate::conflict::{ConflictRecord, ResolveStrategy};
use crate::error::{classify, ErrorKind, ErrorState, RetryPolicy, SyncError};
use crate::key::{KeySelector, ResourceKey};
use crate::model::EntityValue;
use crate::mutation::{MutationOutcome, MutationStatus, PendingMutation};
use crate::remote::{Confirmed, RemoteError, RemoteStore, SubmitOutcome};

/// Snapshot handed to the UI: render `value`, refetch when `is_stale`,
/// spin when `is_loading`, surface `error` until dismissed or cleared.
#[derive(Debug, Clone)]
pub struct ReadState {
  pub value: Option<EntityValue>,
  pub is_stale: bool,
  pub is_loading: bool,
  pub error: Option<ErrorState>,
}

/// Per-key coordination state.
#[derive(Default)]
struct KeyState {
  /// Serializes mutations (and cache-writing fetches) on this key.
  gate: tokio::sync::Mutex<()>,
  /// Id of the most recently issued mutation for this key. A mutation whose
  /// id no longer matches has been superseded and must not touch the cache
  /// with its response.
  latest: AtomicU64,
  fetching: AtomicBool,
  error: Mutex<Option<ErrorState>>,
}

/// Client facade over a remote backend and the shared read cache.
pub struct SyncClient<R, S = NoopStorage> {
  remote: R,
  cache: CacheStore<S>,
  policy: RetryPolicy,
  request_timeout: Duration,
  keys: Mutex<HashMap<ResourceKey, Arc<KeyState>>>,
  next_id: AtomicU64,
}

impl<R: RemoteStore> SyncClient<R, NoopStorage> {
  /// A client with a purely in-memory cache.
  pub fn new(remote: R, config: &SyncConfig) -> Self {
    let cache = CacheStore::in_memory(config.stale_after(), config.evict_after());
    Self::with_cache(remote, cache, config)
  }
}

impl<R: RemoteStore, S: SnapshotStorage> SyncClient<R, S> {
  pub fn with_cache(remote: R, cache: CacheStore<S>, config: &SyncConfig) -> Self {
    Self {
      remote,
      cache,
      policy: config.retry_policy(),
      request_timeout: config.request_timeout(),
      keys: Mutex::new(HashMap::new()),
      next_id: AtomicU64::new(0),
    }
  }

  pub fn cache(&self) -> &CacheStore<S> {
    &self.cache
  }

  fn key_state(&self, key: &ResourceKey) -> Arc<KeyState> {
    self
      .keys
      .lock()
      .entry(key.clone())
      .or_default()
      .clone()
  }

  /// Synchronous, never-blocking snapshot for rendering. An absent value is
  /// the caller's cue to call [`fetch`](Self::fetch).
  pub fn read(&self, key: &ResourceKey) -> ReadState {
    let cached = self.cache.get(key);
    let state = self.keys.lock().get(key).cloned();
    ReadState {
      is_stale: cached.as_ref().map(|c| c.is_stale).unwrap_or(true),
      value: cached.map(|c| c.value),
      is_loading: state
        .as_ref()
        .map(|s| s.fetching.load(Ordering::SeqCst))
        .unwrap_or(false),
      error: state.and_then(|s| s.error.lock().clone()),
    }
  }

  /// Refetch a key from the backend and repopulate the cache.
  ///
  /// On failure with a cached value present, the stale value keeps being
  /// served and the classified error is recorded instead of erasing the
  /// entry; with nothing cached the error surfaces.
  pub async fn fetch(&self, key: &ResourceKey) -> Result<EntityValue, SyncError> {
    let state = self.key_state(key);
    state.fetching.store(true, Ordering::SeqCst);
    let result = self.fetch_locked(key, &state).await;
    state.fetching.store(false, Ordering::SeqCst);
    result
  }

  async fn fetch_locked(&self, key: &ResourceKey, state: &KeyState) -> Result<EntityValue, SyncError> {
    // Serialized with mutations so a refetch can never clobber an
    // optimistic value mid-mutation.
    let _gate = state.gate.lock().await;
    match self.request(self.remote.fetch(key)).await {
      Ok(confirmed) => {
        self.cache.set(key, confirmed.value.clone(), confirmed.marker);
        *state.error.lock() = None;
        Ok(confirmed.value)
      }
      Err(err) => {
        let kind = classify(&err);
        *state.error.lock() = Some(ErrorState::new(kind, &err.message, &self.policy));
        match self.cache.get(key) {
          Some(cached) => {
            debug!(%key, %kind, "refetch failed, serving cached value");
            Ok(cached.value)
          }
          None => Err(SyncError::Fetch {
            kind,
            key: key.clone(),
            message: err.message,
          }),
        }
      }
    }
  }

  /// Prefetch several keys at once. Keys are fully independent, so the
  /// fetches run concurrently; results come back in input order.
  pub async fn fetch_all(&self, keys: &[ResourceKey]) -> Vec<Result<EntityValue, SyncError>> {
    futures::future::join_all(keys.iter().map(|key| self.fetch(key))).await
  }

  /// Run one mutation through the pipeline: project, snapshot, optimistic
  /// apply, submit with the retry policy, then commit, roll back, or hand
  /// back a conflict for the operator.
  pub async fn mutate(
    &self,
    key: &ResourceKey,
    payload: EntityValue,
  ) -> Result<MutationOutcome, SyncError> {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    let state = self.key_state(key);

    // Latest intent wins: announce this mutation before queueing so an
    // in-flight predecessor stops retrying. `fetch_max` keeps the newest id
    // even when the announces themselves interleave out of issue order.
    state.latest.fetch_max(id, Ordering::SeqCst);
    let _gate = state.gate.lock().await;
    if state.latest.load(Ordering::SeqCst) != id {
      return Err(SyncError::Superseded { key: key.clone() });
    }

    let optimistic = payload.project();
    let previous = self.cache.snapshot(key);
    let mut pending = PendingMutation::new(id, key.clone(), previous, optimistic);
    let expected = pending.expected_marker();
    let applied_at = Utc::now();

    self
      .cache
      .stage(key, pending.optimistic.clone(), expected);
    debug!(%key, id, "optimistic value applied");

    let max_retries = self.policy.max_retries(ErrorKind::Network);
    // Tracks the failure (and its retry count) across the retry loop; on
    // terminal failure this becomes the key's recorded error.
    let mut failure: Option<ErrorState> = None;
    let mut result = self
      .request(self.remote.submit(key, &pending.optimistic, expected.as_ref()))
      .await;

    loop {
      if state.latest.load(Ordering::SeqCst) != id {
        self.roll_back(&mut pending);
        return Err(SyncError::Superseded { key: key.clone() });
      }

      match result {
        Ok(SubmitOutcome::Committed(confirmed)) => {
          pending.status = MutationStatus::Committed;
          self.commit(key, &confirmed, &state);
          return Ok(MutationOutcome::Committed {
            value: confirmed.value,
            marker: confirmed.marker,
          });
        }
        Ok(SubmitOutcome::Conflict(signal)) => {
          pending.status = MutationStatus::Conflicted;
          *state.error.lock() = Some(ErrorState::new(
            ErrorKind::Conflict,
            "remote version diverged",
            &self.policy,
          ));
          warn!(%key, id, "version conflict detected");
          // The optimistic value stays in the cache as the local candidate
          // until the operator decides.
          return Ok(MutationOutcome::Conflict(ConflictRecord {
            key: key.clone(),
            local_value: pending.optimistic.clone(),
            remote_value: signal.current.value,
            local_modified_at: applied_at,
            remote_modified_at: signal.current.marker.timestamp(),
            remote_marker: signal.current.marker,
            mutation_id: id,
          }));
        }
        Err(err) => {
          let kind = classify(&err);
          let retries_done = failure.as_ref().map_or(0, |f| f.retry_count);
          if kind == ErrorKind::Network && retries_done < max_retries {
            let delay = self.policy.backoff(kind, retries_done).unwrap_or_default();
            failure
              .get_or_insert_with(|| ErrorState::new(kind, &err.message, &self.policy))
              .record_attempt();
            debug!(%key, id, retry = retries_done + 1, ?delay, "transient failure, backing off");
            sleep(delay).await;
            if state.latest.load(Ordering::SeqCst) != id {
              self.roll_back(&mut pending);
              return Err(SyncError::Superseded { key: key.clone() });
            }
            // Resubmit only while the backend is reachable again; an
            // offline interval still consumes retry budget.
            result = if self.remote.is_reachable().await {
              self
                .request(self.remote.submit(key, &pending.optimistic, expected.as_ref()))
                .await
            } else {
              Err(RemoteError::new("remote unreachable"))
            };
            continue;
          }

          self.roll_back(&mut pending);
          let attempts = retries_done + 1;
          let error_state = match failure.take() {
            // The tracked state keeps its retry count; only the message is
            // refreshed to the final failure's.
            Some(mut tracked) if tracked.kind == kind => {
              tracked.message = err.message.clone();
              tracked
            }
            _ => ErrorState::new(kind, &err.message, &self.policy),
          };
          *state.error.lock() = Some(error_state);
          warn!(%key, id, %kind, "mutation failed, rolled back");
          return Err(SyncError::Mutation {
            kind,
            attempts,
            message: err.message,
          });
        }
      }
    }
  }

  /// Consume a conflict record with exactly one strategy.
  ///
  /// `Remote` needs no round trip: the signal already carried the server's
  /// value and marker. `Local` and `Merge` resubmit as an unconditional
  /// overwrite, refreshing the server marker. A failure here is terminal;
  /// nothing is retried automatically.
  pub async fn resolve_conflict(
    &self,
    record: ConflictRecord,
    strategy: ResolveStrategy,
  ) -> Result<EntityValue, SyncError> {
    let key = record.key.clone();
    let state = self.key_state(&key);
    let _gate = state.gate.lock().await;
    debug!(%key, %strategy, id = record.mutation_id, "resolving conflict");

    let resolved = match strategy {
      ResolveStrategy::Remote => {
        self
          .cache
          .set(&key, record.remote_value.clone(), record.remote_marker);
        *state.error.lock() = None;
        self.invalidate_dependents(&key);
        return Ok(record.remote_value);
      }
      ResolveStrategy::Local => record.local_value,
      ResolveStrategy::Merge => EntityValue::merge(&record.local_value, &record.remote_value)
        .ok_or_else(|| SyncError::Resolution {
          key: key.clone(),
          message: "local and remote are different entity kinds".to_string(),
        })?,
    };

    let mut resubmits = 0u32;
    loop {
      match self.request(self.remote.submit(&key, &resolved, None)).await {
        Ok(SubmitOutcome::Committed(confirmed)) => {
          self.cache.set(&key, confirmed.value.clone(), confirmed.marker);
          *state.error.lock() = None;
          self.invalidate_dependents(&key);
          return Ok(confirmed.value);
        }
        Ok(SubmitOutcome::Conflict(_)) if resubmits < self.policy.max_conflict_retries => {
          // An unconditional overwrite should not conflict; the bounded
          // resolver retries go out back-to-back, with no delay.
          resubmits += 1;
          debug!(%key, resubmits, "conflict during resolution, resubmitting");
        }
        Ok(SubmitOutcome::Conflict(_)) => {
          *state.error.lock() = Some(ErrorState::new(
            ErrorKind::Conflict,
            "record kept diverging during resolution",
            &self.policy,
          ));
          return Err(SyncError::Resolution {
            key,
            message: "record kept diverging during resolution".to_string(),
          });
        }
        Err(err) => {
          let kind = classify(&err);
          *state.error.lock() = Some(ErrorState::new(kind, &err.message, &self.policy));
          warn!(%key, %kind, "conflict resolution failed");
          return Err(SyncError::Resolution {
            key,
            message: err.message,
          });
        }
      }
    }
  }

  /// Mark matching entries stale; the next read refetches while the old
  /// value stays displayable.
  pub fn invalidate(&self, selector: &KeySelector) -> usize {
    self.cache.invalidate(selector)
  }

  /// Clear the recorded error for a key without any other side effect.
  pub fn dismiss_error(&self, key: &ResourceKey) {
    if let Some(state) = self.keys.lock().get(key) {
      *state.error.lock() = None;
    }
  }

  /// Evict entries past their GC horizon. Keys with an in-flight mutation or
  /// fetch are treated as subscribed and skipped. Coordination state for
  /// idle keys without a cache entry is dropped along the way, so the key
  /// map does not grow without bound; a recorded error keeps its state
  /// alive until dismissed.
  pub fn sweep(&self) -> usize {
    let mut keys = self.keys.lock();
    let active: HashSet<ResourceKey> = keys
      .iter()
      .filter(|(_, state)| {
        state.fetching.load(Ordering::SeqCst) || state.gate.try_lock().is_err()
      })
      .map(|(key, _)| key.clone())
      .collect();
    let evicted = self.cache.sweep(|key| active.contains(key));
    keys.retain(|key, state| {
      active.contains(key) || state.error.lock().is_some() || self.cache.get(key).is_some()
    });
    evicted
  }

  fn commit(&self, key: &ResourceKey, confirmed: &Confirmed, state: &KeyState) {
    self.cache.set(key, confirmed.value.clone(), confirmed.marker);
    *state.error.lock() = None;
    self.invalidate_dependents(key);
    debug!(%key, "committed");
  }

  fn invalidate_dependents(&self, key: &ResourceKey) {
    for dependent in key.dependents() {
      if self.cache.invalidate_key(&dependent) {
        debug!(key = %dependent, "dependent aggregate invalidated");
      }
    }
  }

  fn roll_back(&self, pending: &mut PendingMutation) {
    // A mutation rolls back at most once; a terminal one keeps its outcome.
    if pending.status.is_terminal() {
      return;
    }
    match pending.previous.take() {
      Some(entry) => self.cache.restore(&pending.key, entry),
      None => self.cache.remove(&pending.key),
    }
    pending.status = MutationStatus::RolledBack;
    debug!(key = %pending.key, id = pending.id, "rolled back to pre-mutation value");
  }

  async fn request<T, F>(&self, fut: F) -> Result<T, RemoteError>
  where
    F: Future<Output = Result<T, RemoteError>>,
  {
    match timeout(self.request_timeout, fut).await {
      Ok(result) => result,
      Err(_) => Err(RemoteError::new("request timed out")),
    }
  }
}
