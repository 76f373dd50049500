use std::{fmt, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

/// Quota units
pub type Amount = i64;

/// Unique hold identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HoldId(Uuid);

impl HoldId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HoldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A reservation against a tenant's balance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hold {
    pub id: HoldId,
    pub tenant_id: String,
    /// Reserved amount, already withheld from the spendable balance
    pub amount: Amount,
    pub acquired_at: SystemTime,
}

/// Lifecycle of a hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HoldState {
    Acquired,
    Committed { amount: Amount },
    Released,
}

/// Result of committing a hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// This call settled the hold
    Committed { amount: Amount },
    /// The hold had already been committed; nothing changed
    AlreadyCommitted { amount: Amount },
}

impl CommitOutcome {
    /// Amount charged for the hold
    pub const fn amount(self) -> Amount {
        match self {
            Self::Committed { amount } | Self::AlreadyCommitted { amount } => amount,
        }
    }
}

/// Result of crediting a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CreditOutcome {
    /// Balance increased
    Applied { balance: Amount },
    /// Transaction id was seen before; balance unchanged
    Duplicate,
}

/// Point-in-time view of a tenant account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSnapshot {
    pub tenant_id: String,
    /// Spendable balance, net of outstanding holds
    pub balance: Amount,
    /// Sum of every committed charge; never decreases
    pub committed_total: Amount,
    /// Sum of outstanding holds
    pub reserved_total: Amount,
}
