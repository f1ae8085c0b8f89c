//! Client-side data synchronization core for a household ledger application.
//!
//! What lives here is the piece between the forms/dashboards and the
//! persistence backend: a key-addressed read cache with bounded staleness, a
//! mutation pipeline that applies an optimistic projection before the network
//! confirms and rolls it back exactly on failure, version-marker conflict
//! detection with operator-driven resolution, and a classified, bounded retry
//! policy.
//!
//! The backend itself (transport, routes, auth) is a black box behind the
//! [`remote::RemoteStore`] trait; the UI consumes [`client::SyncClient`]'s
//! `read` / `mutate` / `resolve_conflict` surface.

pub mod cache;
pub mod client;
pub mod config;
pub mod conflict;
pub mod error;
pub mod key;
pub mod model;
pub mod mutation;
pub mod remote;

pub use cache::{CacheStore, NoopStorage, SnapshotStorage, SqliteStorage};
pub use client::{ReadState, SyncClient};
pub use config::SyncConfig;
pub use conflict::{ConflictRecord, ResolveStrategy};
pub use error::{ErrorKind, ErrorState, RetryPolicy, SyncError};
pub use key::{EntityKind, KeySelector, Period, ResourceKey};
pub use model::EntityValue;
pub use mutation::{MutationOutcome, MutationStatus, PendingMutation};
pub use remote::{Confirmed, ConflictSignal, RemoteError, RemoteStore, SubmitOutcome, VersionMarker};
