//! Deferred hold releases
//!
//! A hold whose release keeps failing is never dropped. It is parked in a
//! [`ReleaseQueue`] and retried in the background until the ledger accepts
//! the release, so the reservation is eventually returned to the tenant.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Amount, Hold, HoldId, Ledger, LedgerError, RecoveryBook};

/// Bounded in-line retry for one release call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseRetry {
    /// Total release calls, including the first
    pub attempts: u32,
    /// Pause before the second call; doubles after every failure
    pub initial_backoff: Duration,
}

impl Default for ReleaseRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

impl ReleaseRetry {
    /// Release `hold`, retrying while the ledger reports itself unavailable
    ///
    /// # Errors
    ///
    /// Returns the last ledger error once attempts are exhausted, or any
    /// non-transient error immediately
    pub async fn release(&self, ledger: &dyn Ledger, hold: &Hold) -> Result<(), LedgerError> {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;

        loop {
            match ledger.release(hold).await {
                Err(LedgerError::Unavailable(reason)) if attempt < self.attempts => {
                    tracing::debug!(hold_id = %hold.id, attempt, %reason, "hold release failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// A hold waiting for its release to go through
#[derive(Debug, Clone, Serialize)]
pub struct DeferredRelease {
    pub hold_id: HoldId,
    pub tenant_id: String,
    pub amount: Amount,
    /// Request whose recovery obligation depends on how this hold ends
    pub request_id: Option<String>,
    pub deferred_at: SystemTime,
    /// Background attempts so far
    pub attempts: u32,
    #[serde(skip)]
    hold: Hold,
}

/// Totals from one pass over the deferred holds
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
    pub released: usize,
    /// Holds found committed; any dependent obligation was withdrawn
    pub committed: usize,
    /// Holds the ledger no longer knows about
    pub dropped: usize,
    pub errors: usize,
    pub remaining: usize,
}

/// Holds whose release must still be applied
#[derive(Default)]
pub struct ReleaseQueue {
    pending: DashMap<HoldId, DeferredRelease>,
}

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a hold that could not be released
    pub fn defer(&self, hold: Hold, request_id: Option<&str>) {
        tracing::error!(
            tenant_id = %hold.tenant_id,
            hold_id = %hold.id,
            amount = hold.amount,
            request_id,
            "hold release deferred"
        );

        self.pending.insert(
            hold.id,
            DeferredRelease {
                hold_id: hold.id,
                tenant_id: hold.tenant_id.clone(),
                amount: hold.amount,
                request_id: request_id.map(str::to_owned),
                deferred_at: SystemTime::now(),
                attempts: 0,
                hold,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, hold_id: HoldId) -> bool {
        self.pending.contains_key(&hold_id)
    }

    /// Deferred holds of one tenant
    pub fn pending(&self, tenant_id: &str) -> Vec<DeferredRelease> {
        self.pending
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Try every deferred release once
    ///
    /// A hold that turns out to be committed means an earlier commit landed
    /// even though it was reported as failed; the obligation raised for its
    /// request is withdrawn so the work is not charged twice.
    pub async fn retry(&self, ledger: &dyn Ledger, recovery: &RecoveryBook) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        let due: Vec<DeferredRelease> = self.pending.iter().map(|entry| entry.value().clone()).collect();

        for entry in due {
            match ledger.release(&entry.hold).await {
                Ok(()) => {
                    self.pending.remove(&entry.hold_id);
                    report.released += 1;
                    tracing::info!(
                        tenant_id = %entry.tenant_id,
                        hold_id = %entry.hold_id,
                        amount = entry.amount,
                        "deferred hold released"
                    );
                }
                Err(LedgerError::HoldCommitted(_)) => {
                    self.pending.remove(&entry.hold_id);
                    report.committed += 1;

                    if let Some(request_id) = entry.request_id.as_deref()
                        && recovery.withdraw(request_id)
                    {
                        tracing::info!(request_id, hold_id = %entry.hold_id, "obligation withdrawn, commit had landed");
                    }
                }
                Err(LedgerError::UnknownHold(_)) => {
                    self.pending.remove(&entry.hold_id);
                    report.dropped += 1;
                    tracing::warn!(hold_id = %entry.hold_id, "deferred hold unknown to the ledger, dropped");
                }
                Err(e) => {
                    if let Some(mut pending) = self.pending.get_mut(&entry.hold_id) {
                        pending.attempts += 1;
                    }
                    report.errors += 1;
                    tracing::warn!(hold_id = %entry.hold_id, error = %e, "deferred hold release failed");
                }
            }
        }

        report.remaining = self.pending.len();
        report
    }

    /// Retry deferred releases every `interval` until `shutdown` is cancelled
    pub async fn run(
        self: Arc<Self>,
        ledger: Arc<dyn Ledger>,
        recovery: Arc<RecoveryBook>,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if self.is_empty() {
                        continue;
                    }

                    let report = self.retry(ledger.as_ref(), &recovery).await;
                    tracing::debug!(
                        released = report.released,
                        committed = report.committed,
                        errors = report.errors,
                        remaining = report.remaining,
                        "deferred release sweep finished"
                    );
                }
            }
        }

        tracing::debug!("release sweeper stopped");
    }

    pub fn spawn(
        self: &Arc<Self>,
        ledger: Arc<dyn Ledger>,
        recovery: Arc<RecoveryBook>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(ledger, recovery, interval, shutdown))
    }
}
