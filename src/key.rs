//! Resource keys for cached ledger entities and the mutations that target them.
//!
//! A key is the composite (entity kind, owner, monthly period, optional sub-id).
//! It is deterministic and unique per resource, and it is the only identity the
//! cache and the mutation pipeline ever use.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The entity families tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
  Income,
  Expense,
  Savings,
  Account,
  /// Derived dashboard aggregate over the other kinds for one owner + period.
  Summary,
}

impl EntityKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      EntityKind::Income => "income",
      EntityKind::Expense => "expense",
      EntityKind::Savings => "savings",
      EntityKind::Account => "account",
      EntityKind::Summary => "summary",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "income" => Some(EntityKind::Income),
      "expense" => Some(EntityKind::Expense),
      "savings" => Some(EntityKind::Savings),
      "account" => Some(EntityKind::Account),
      "summary" => Some(EntityKind::Summary),
      _ => None,
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A monthly bucket, e.g. `2025-09`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Period {
  pub year: i32,
  /// 1-based month, 1..=12.
  pub month: u32,
}

impl Period {
  pub fn new(year: i32, month: u32) -> Self {
    debug_assert!((1..=12).contains(&month), "month out of range: {}", month);
    Self { year, month }
  }
}

impl fmt::Display for Period {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:04}-{:02}", self.year, self.month)
  }
}

/// Composite key identifying one cached resource.
///
/// `sub_id` distinguishes sub-resources under the same bucket (e.g. one of
/// several accounts an owner holds in the same month).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
  pub kind: EntityKind,
  pub owner: String,
  pub period: Period,
  pub sub_id: Option<String>,
}

impl ResourceKey {
  pub fn new(kind: EntityKind, owner: impl Into<String>, period: Period) -> Self {
    Self {
      kind,
      owner: owner.into(),
      period,
      sub_id: None,
    }
  }

  pub fn with_sub(mut self, sub_id: impl Into<String>) -> Self {
    self.sub_id = Some(sub_id.into());
    self
  }

  /// The summary key for this key's owner + period.
  pub fn summary(&self) -> ResourceKey {
    ResourceKey::new(EntityKind::Summary, self.owner.clone(), self.period)
  }

  /// Keys whose derived aggregates depend on this one.
  ///
  /// Every concrete kind feeds the dashboard summary of the same owner and
  /// period; the summary itself feeds nothing.
  pub fn dependents(&self) -> Vec<ResourceKey> {
    match self.kind {
      EntityKind::Summary => Vec::new(),
      _ => vec![self.summary()],
    }
  }
}

impl fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}/{}", self.kind, self.owner, self.period)?;
    if let Some(sub) = &self.sub_id {
      write!(f, "/{}", sub)?;
    }
    Ok(())
  }
}

/// Prefix matcher for invalidation: any combination of kind, owner and period.
///
/// An empty selector matches every key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySelector {
  pub kind: Option<EntityKind>,
  pub owner: Option<String>,
  pub period: Option<Period>,
}

impl KeySelector {
  pub fn all() -> Self {
    Self::default()
  }

  pub fn of_kind(kind: EntityKind) -> Self {
    Self {
      kind: Some(kind),
      ..Self::default()
    }
  }

  pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
    self.owner = Some(owner.into());
    self
  }

  pub fn with_period(mut self, period: Period) -> Self {
    self.period = Some(period);
    self
  }

  pub fn matches(&self, key: &ResourceKey) -> bool {
    if let Some(kind) = self.kind {
      if key.kind != kind {
        return false;
      }
    }
    if let Some(owner) = &self.owner {
      if &key.owner != owner {
        return false;
      }
    }
    if let Some(period) = self.period {
      if key.period != period {
        return false;
      }
    }
    true
  }
}
