//! Typed ledger records and the operations the sync core performs on them.
//!
//! The persistence layer speaks loose JSON; everything on this side of the
//! wire is one of the explicit shapes below, so the optimistic projection and
//! the merge strategy always operate on known fields rather than arbitrary
//! key sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::key::EntityKind;

/// Named monetary line items, e.g. one salary entry per earner.
/// Amounts are integer won.
pub type Lines = BTreeMap<String, i64>;

/// Monthly income: per-source lines plus the derived total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeRecord {
  #[serde(default)]
  pub lines: Lines,
  #[serde(default)]
  pub memo: Option<String>,
  /// Derived: sum of `lines`. Recomputed by [`EntityValue::project`].
  #[serde(default)]
  pub total_income: i64,
}

/// Monthly expenses, split into fixed and variable lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRecord {
  #[serde(default)]
  pub fixed: Lines,
  #[serde(default)]
  pub variable: Lines,
  #[serde(default)]
  pub memo: Option<String>,
  /// Derived: sum of `fixed` and `variable`.
  #[serde(default)]
  pub total_expense: i64,
}

/// Monthly savings deposits and an optional target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavingsRecord {
  #[serde(default)]
  pub deposits: Lines,
  #[serde(default)]
  pub goal: Option<i64>,
  /// Derived: sum of `deposits`.
  #[serde(default)]
  pub total_saved: i64,
}

/// A single account balance snapshot. No derived fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
  #[serde(default)]
  pub bank: String,
  #[serde(default)]
  pub holder: String,
  #[serde(default)]
  pub balance: i64,
  #[serde(default)]
  pub memo: Option<String>,
}

/// The dashboard aggregate for one owner + period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
  #[serde(default)]
  pub total_income: i64,
  #[serde(default)]
  pub total_expense: i64,
  #[serde(default)]
  pub total_saved: i64,
  /// Derived: income minus expenses.
  #[serde(default)]
  pub net_balance: i64,
}

/// One ledger entity, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityValue {
  Income(IncomeRecord),
  Expense(ExpenseRecord),
  Savings(SavingsRecord),
  Account(AccountRecord),
  Summary(SummaryRecord),
}

impl EntityValue {
  pub fn kind(&self) -> EntityKind {
    match self {
      EntityValue::Income(_) => EntityKind::Income,
      EntityValue::Expense(_) => EntityKind::Expense,
      EntityValue::Savings(_) => EntityKind::Savings,
      EntityValue::Account(_) => EntityKind::Account,
      EntityValue::Summary(_) => EntityKind::Summary,
    }
  }

  /// The optimistic projection: the value as it will look if the server
  /// accepts the submitted fields, i.e. with every derived total recomputed
  /// locally. Deterministic and side-effect free.
  pub fn project(&self) -> EntityValue {
    match self.clone() {
      EntityValue::Income(mut r) => {
        r.total_income = sum(&r.lines);
        EntityValue::Income(r)
      }
      EntityValue::Expense(mut r) => {
        r.total_expense = sum(&r.fixed) + sum(&r.variable);
        EntityValue::Expense(r)
      }
      EntityValue::Savings(mut r) => {
        r.total_saved = sum(&r.deposits);
        EntityValue::Savings(r)
      }
      EntityValue::Account(r) => EntityValue::Account(r),
      EntityValue::Summary(mut r) => {
        r.net_balance = r.total_income - r.total_expense;
        EntityValue::Summary(r)
      }
    }
  }

  /// Field-by-field merge of two versions of the same entity.
  ///
  /// Rule: last-non-default-wins with local preference. A field keeps the
  /// local side when it is non-default (non-zero amount, non-empty string,
  /// `Some`), otherwise it takes the remote side. Line-item maps merge as the
  /// union of both key sets with the same per-entry rule. Derived totals are
  /// recomputed afterwards, so a merged record is always internally
  /// consistent.
  ///
  /// Returns `None` when the two values are of different kinds.
  pub fn merge(local: &EntityValue, remote: &EntityValue) -> Option<EntityValue> {
    let merged = match (local, remote) {
      (EntityValue::Income(l), EntityValue::Income(r)) => EntityValue::Income(IncomeRecord {
        lines: merge_lines(&l.lines, &r.lines),
        memo: pick_opt(&l.memo, &r.memo),
        total_income: 0,
      }),
      (EntityValue::Expense(l), EntityValue::Expense(r)) => EntityValue::Expense(ExpenseRecord {
        fixed: merge_lines(&l.fixed, &r.fixed),
        variable: merge_lines(&l.variable, &r.variable),
        memo: pick_opt(&l.memo, &r.memo),
        total_expense: 0,
      }),
      (EntityValue::Savings(l), EntityValue::Savings(r)) => EntityValue::Savings(SavingsRecord {
        deposits: merge_lines(&l.deposits, &r.deposits),
        goal: pick_opt(&l.goal, &r.goal),
        total_saved: 0,
      }),
      (EntityValue::Account(l), EntityValue::Account(r)) => EntityValue::Account(AccountRecord {
        bank: pick_string(&l.bank, &r.bank),
        holder: pick_string(&l.holder, &r.holder),
        balance: pick_amount(l.balance, r.balance),
        memo: pick_opt(&l.memo, &r.memo),
      }),
      (EntityValue::Summary(l), EntityValue::Summary(r)) => EntityValue::Summary(SummaryRecord {
        total_income: pick_amount(l.total_income, r.total_income),
        total_expense: pick_amount(l.total_expense, r.total_expense),
        total_saved: pick_amount(l.total_saved, r.total_saved),
        net_balance: 0,
      }),
      _ => return None,
    };
    Some(merged.project())
  }
}

fn sum(lines: &Lines) -> i64 {
  lines.values().sum()
}

fn merge_lines(local: &Lines, remote: &Lines) -> Lines {
  let mut out = remote.clone();
  for (name, amount) in local {
    if *amount != 0 {
      out.insert(name.clone(), *amount);
    } else {
      out.entry(name.clone()).or_insert(0);
    }
  }
  out
}

fn pick_amount(local: i64, remote: i64) -> i64 {
  if local != 0 {
    local
  } else {
    remote
  }
}

fn pick_string(local: &str, remote: &str) -> String {
  if local.is_empty() {
    remote.to_string()
  } else {
    local.to_string()
  }
}

fn pick_opt<T: Clone>(local: &Option<T>, remote: &Option<T>) -> Option<T> {
  local.clone().or_else(|| remote.clone())
}
