//! Snapshot storage under the read cache: a trait, a no-op backend, and a
//! SQLite backend so confirmed values survive a restart.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::warn;

use crate::key::{EntityKind, Period, ResourceKey};
use crate::model::EntityValue;
use crate::remote::VersionMarker;

/// Failures from a snapshot backend. These never fail a cache operation;
/// the store logs them and moves on.
#[derive(Debug, Error)]
pub enum PersistError {
  #[error("snapshot database error: {0}")]
  Db(#[from] rusqlite::Error),
  #[error("snapshot serialization error: {0}")]
  Serde(#[from] serde_json::Error),
  #[error("snapshot io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("could not determine a data directory")]
  NoDataDir,
}

/// One row restored from storage.
#[derive(Debug, Clone)]
pub struct PersistedEntry {
  pub key: ResourceKey,
  pub value: EntityValue,
  pub marker: Option<VersionMarker>,
  pub fetched_at: DateTime<Utc>,
}

/// Durability backend for confirmed cache values.
pub trait SnapshotStorage: Send + Sync {
  fn save(
    &self,
    key: &ResourceKey,
    value: &EntityValue,
    marker: Option<&VersionMarker>,
    fetched_at: DateTime<Utc>,
  ) -> Result<(), PersistError>;

  fn remove(&self, key: &ResourceKey) -> Result<(), PersistError>;

  fn load_all(&self) -> Result<Vec<PersistedEntry>, PersistError>;
}

/// Backend that persists nothing. Used when durability is disabled.
pub struct NoopStorage;

impl SnapshotStorage for NoopStorage {
  fn save(
    &self,
    _key: &ResourceKey,
    _value: &EntityValue,
    _marker: Option<&VersionMarker>,
    _fetched_at: DateTime<Utc>,
  ) -> Result<(), PersistError> {
    Ok(())
  }

  fn remove(&self, _key: &ResourceKey) -> Result<(), PersistError> {
    Ok(())
  }

  fn load_all(&self) -> Result<Vec<PersistedEntry>, PersistError> {
    Ok(Vec::new())
  }
}

/// SQLite-backed snapshot storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for the snapshot table. Keys are stored as their components so
/// rows can be inspected and selected without decoding blobs.
const SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS snapshot_cache (
    kind TEXT NOT NULL,
    owner TEXT NOT NULL,
    period TEXT NOT NULL,
    sub_id TEXT NOT NULL DEFAULT '',
    data BLOB NOT NULL,
    marker TEXT,
    fetched_at TEXT NOT NULL,
    PRIMARY KEY (kind, owner, period, sub_id)
);
"#;

impl SqliteStorage {
  /// Open at the default location (`<data dir>/ledgersync/snapshots.db`).
  pub fn open() -> Result<Self, PersistError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(PersistError::NoDataDir)?;
    Self::open_at(&data_dir.join("ledgersync").join("snapshots.db"))
  }

  /// Open (or create) a snapshot database at `path`.
  pub fn open_at(path: &std::path::Path) -> Result<Self, PersistError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(SNAPSHOT_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl SnapshotStorage for SqliteStorage {
  fn save(
    &self,
    key: &ResourceKey,
    value: &EntityValue,
    marker: Option<&VersionMarker>,
    fetched_at: DateTime<Utc>,
  ) -> Result<(), PersistError> {
    let data = serde_json::to_vec(value)?;
    let conn = self.conn.lock();
    conn.execute(
      "INSERT OR REPLACE INTO snapshot_cache (kind, owner, period, sub_id, data, marker, fetched_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        key.kind.as_str(),
        key.owner,
        key.period.to_string(),
        key.sub_id.as_deref().unwrap_or(""),
        data,
        marker.map(|m| m.timestamp().to_rfc3339()),
        fetched_at.to_rfc3339(),
      ],
    )?;
    Ok(())
  }

  fn remove(&self, key: &ResourceKey) -> Result<(), PersistError> {
    let conn = self.conn.lock();
    conn.execute(
      "DELETE FROM snapshot_cache WHERE kind = ? AND owner = ? AND period = ? AND sub_id = ?",
      params![
        key.kind.as_str(),
        key.owner,
        key.period.to_string(),
        key.sub_id.as_deref().unwrap_or(""),
      ],
    )?;
    Ok(())
  }

  fn load_all(&self) -> Result<Vec<PersistedEntry>, PersistError> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare(
      "SELECT kind, owner, period, sub_id, data, marker, fetched_at FROM snapshot_cache",
    )?;

    type Row = (String, String, String, String, Vec<u8>, Option<String>, String);
    let rows: Vec<Row> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })?
      .filter_map(|r| r.ok())
      .collect();

    let mut out = Vec::with_capacity(rows.len());
    for (kind, owner, period, sub_id, data, marker, fetched_at) in rows {
      // A row that no longer decodes is dropped, not fatal; the value will
      // simply be refetched.
      let decoded = decode_row(&kind, owner, &period, sub_id, &data, marker, &fetched_at);
      match decoded {
        Some(entry) => out.push(entry),
        None => warn!(kind, period, "dropping undecodable snapshot row"),
      }
    }
    Ok(out)
  }
}

fn decode_row(
  kind: &str,
  owner: String,
  period: &str,
  sub_id: String,
  data: &[u8],
  marker: Option<String>,
  fetched_at: &str,
) -> Option<PersistedEntry> {
  let kind = EntityKind::parse(kind)?;
  let period = parse_period(period)?;
  let value: EntityValue = serde_json::from_slice(data).ok()?;
  let fetched_at = parse_datetime(fetched_at)?;
  let marker = match marker {
    Some(m) => Some(VersionMarker::at(parse_datetime(&m)?)),
    None => None,
  };

  let mut key = ResourceKey::new(kind, owner, period);
  if !sub_id.is_empty() {
    key = key.with_sub(sub_id);
  }
  Some(PersistedEntry {
    key,
    value,
    marker,
    fetched_at,
  })
}

fn parse_period(s: &str) -> Option<Period> {
  let (year, month) = s.split_once('-')?;
  let year: i32 = year.parse().ok()?;
  let month: u32 = month.parse().ok()?;
  if (1..=12).contains(&month) {
    Some(Period::new(year, month))
  } else {
    None
  }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{EntityValue, IncomeRecord};

  fn income_key() -> ResourceKey {
    ResourceKey::new(EntityKind::Income, "family", Period::new(2025, 9))
  }

  fn income() -> EntityValue {
    EntityValue::Income(IncomeRecord {
      lines: [("salary".to_string(), 5_000_000)].into(),
      memo: Some("september".to_string()),
      total_income: 5_000_000,
    })
  }

  #[test]
  fn save_load_remove_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open_at(&dir.path().join("snapshots.db")).unwrap();

    let marker = VersionMarker::now();
    storage
      .save(&income_key(), &income(), Some(&marker), Utc::now())
      .unwrap();
    let sub = income_key().with_sub("side");
    storage.save(&sub, &income(), None, Utc::now()).unwrap();

    let loaded = storage.load_all().unwrap();
    assert_eq!(loaded.len(), 2);
    let main = loaded.iter().find(|e| e.key == income_key()).unwrap();
    assert_eq!(main.value, income());
    assert_eq!(main.marker, Some(marker));
    let side = loaded.iter().find(|e| e.key == sub).unwrap();
    assert!(side.marker.is_none());

    storage.remove(&income_key()).unwrap();
    assert_eq!(storage.load_all().unwrap().len(), 1);
  }

  #[test]
  fn save_overwrites_per_key() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open_at(&dir.path().join("snapshots.db")).unwrap();

    storage
      .save(&income_key(), &income(), None, Utc::now())
      .unwrap();
    storage
      .save(&income_key(), &income(), Some(&VersionMarker::now()), Utc::now())
      .unwrap();

    let loaded = storage.load_all().unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].marker.is_some());
  }
}
