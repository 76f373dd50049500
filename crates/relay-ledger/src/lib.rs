//! Tenant quota ledger
//!
//! Balances are debited through holds: a request reserves an estimate,
//! then either commits the actual amount or releases the reservation.
//! Commits are idempotent per hold and external credits are idempotent
//! per transaction id.

#![allow(clippy::must_use_candidate)]

mod error;
mod ledger;
mod memory;
mod recovery;
mod release;
mod types;

pub use error::LedgerError;
pub use ledger::Ledger;
pub use memory::{DEFAULT_SETTLED_RETENTION, MemoryLedger};
pub use recovery::{Obligation, ObligationStatus, RecoveryBook, RecoverySummary, Resolution};
pub use release::{DeferredRelease, ReleaseQueue, ReleaseReport, ReleaseRetry};
pub use types::{AccountSnapshot, Amount, CommitOutcome, CreditOutcome, Hold, HoldId, HoldState};
