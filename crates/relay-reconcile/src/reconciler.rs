use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use dashmap::{DashMap, mapref::entry::Entry};
use relay_channel::ChannelId;
use relay_ledger::{Amount, Ledger, LedgerError, ReleaseQueue};
use relay_telemetry::{KeyValue, metrics};
use serde::Serialize;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{JobPhase, JobState, JobStatus, JobStatusSource, JobView, ReconcileError, TrackedJob};

/// Totals from one pass over the pending jobs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub polled: usize,
    pub settled: usize,
    pub refunded: Amount,
    pub errors: usize,
    /// Settled jobs forgotten after their retention elapsed
    pub pruned: usize,
}

/// Reconciler timing
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerSettings {
    pub poll_interval: Duration,
    /// Pending jobs older than this are settled as failed
    pub abandon_after: Duration,
    /// Settled jobs stay queryable this long
    pub settled_retention: Duration,
}

/// Converges asynchronous jobs to their terminal ledger state
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

struct Inner {
    ledger: Arc<dyn Ledger>,
    source: Arc<dyn JobStatusSource>,
    releases: Arc<ReleaseQueue>,
    /// `None` while the provisional charge is being taken
    jobs: DashMap<String, Option<Tracked>>,
    settings: ReconcilerSettings,
}

struct Tracked {
    job: TrackedJob,
    registered: Instant,
    phase: JobPhase,
    settled_at: Option<Instant>,
}

struct Verdict {
    outcome: JobState,
    billable: Amount,
    abandoned: bool,
    reason: Option<String>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        source: Arc<dyn JobStatusSource>,
        releases: Arc<ReleaseQueue>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger,
                source,
                releases,
                jobs: DashMap::new(),
                settings,
            }),
        }
    }

    /// Take the provisional charge for a job and start tracking it
    ///
    /// # Errors
    ///
    /// Fails if the job id is already tracked, the amount is not positive,
    /// or the ledger refuses the charge. Nothing is charged on error.
    pub async fn begin_job(
        &self,
        tenant_id: &str,
        job_id: &str,
        channel_id: ChannelId,
        amount: Amount,
    ) -> Result<TrackedJob, ReconcileError> {
        if amount <= 0 {
            return Err(ReconcileError::InvalidAmount(amount));
        }

        match self.inner.jobs.entry(job_id.to_owned()) {
            Entry::Occupied(_) => return Err(ReconcileError::DuplicateJob(job_id.to_owned())),
            Entry::Vacant(slot) => {
                slot.insert(None);
            }
        }

        if let Err(e) = self.charge(tenant_id, amount).await {
            self.inner.jobs.remove(job_id);
            return Err(e);
        }

        let job = TrackedJob {
            job_id: job_id.to_owned(),
            tenant_id: tenant_id.to_owned(),
            channel_id,
            charged: amount,
            submitted_at: SystemTime::now(),
        };

        self.inner.jobs.insert(
            job_id.to_owned(),
            Some(Tracked {
                job: job.clone(),
                registered: Instant::now(),
                phase: JobPhase::Pending,
                settled_at: None,
            }),
        );

        tracing::info!(tenant_id, job_id, channel_id, amount, "async job registered");
        Ok(job)
    }

    async fn charge(&self, tenant_id: &str, amount: Amount) -> Result<(), ReconcileError> {
        let ledger = &self.inner.ledger;
        let hold = ledger.reserve(tenant_id, amount).await?;

        let Err(commit_error) = ledger.commit(&hold, amount).await else {
            return Ok(());
        };

        match ledger.release(&hold).await {
            // Commit applied but its acknowledgement was lost
            Err(LedgerError::HoldCommitted(_)) => Ok(()),
            Err(e) => {
                tracing::error!(hold_id = %hold.id, error = %e, "hold release failed after commit failure");
                self.inner.releases.defer(hold, None);
                Err(commit_error.into())
            }
            Ok(()) => Err(commit_error.into()),
        }
    }

    /// Current view of a job; settled jobs disappear once their retention elapses
    pub fn job(&self, job_id: &str) -> Option<JobView> {
        let slot = self.inner.jobs.get(job_id)?;
        let tracked = slot.value().as_ref()?;

        Some(JobView {
            job: tracked.job.clone(),
            phase: tracked.phase.clone(),
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    fn pending(&self) -> Vec<(TrackedJob, Instant)> {
        self.inner
            .jobs
            .iter()
            .filter_map(|slot| {
                slot.value()
                    .as_ref()
                    .filter(|tracked| tracked.phase == JobPhase::Pending)
                    .map(|tracked| (tracked.job.clone(), tracked.registered))
            })
            .collect()
    }

    /// Number of jobs held in memory, settled ones included
    pub fn tracked_count(&self) -> usize {
        self.inner.jobs.len()
    }

    /// Forget settled jobs whose retention has elapsed
    fn prune_settled(&self) -> usize {
        let retention = self.inner.settings.settled_retention;
        let before = self.inner.jobs.len();

        self.inner.jobs.retain(|_, slot| {
            !slot
                .as_ref()
                .and_then(|tracked| tracked.settled_at)
                .is_some_and(|settled| settled.elapsed() >= retention)
        });

        before.saturating_sub(self.inner.jobs.len())
    }

    /// Poll every pending job once and settle those that reached a verdict
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport {
            pruned: self.prune_settled(),
            ..SweepReport::default()
        };

        for (job, registered) in self.pending() {
            report.polled += 1;

            match self.reconcile(&job, registered).await {
                Ok(Some(refunded)) => {
                    report.settled += 1;
                    report.refunded += refunded;
                }
                Ok(None) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(job_id = %job.job_id, tenant_id = %job.tenant_id, error = %e, "job reconciliation failed");
                }
            }
        }

        report
    }

    async fn reconcile(&self, job: &TrackedJob, registered: Instant) -> Result<Option<Amount>, ReconcileError> {
        let abandoned = registered.elapsed() >= self.inner.settings.abandon_after;

        let status = match self.inner.source.poll(job).await {
            Ok(status) => Some(status),
            Err(e) if abandoned => {
                tracing::warn!(job_id = %job.job_id, error = %e, "status unavailable for abandoned job");
                None
            }
            Err(e) => return Err(e),
        };

        let Some(verdict) = verdict(job, status, abandoned) else {
            return Ok(None);
        };

        // Work billed above the provisional charge is not collected
        let refund = job.charged - verdict.billable.clamp(0, job.charged);

        if refund > 0 {
            let transaction_id = format!("refund:{}", job.job_id);
            self.inner
                .ledger
                .credit(&job.tenant_id, refund, Some(&transaction_id))
                .await?;
        }

        let outcome = if verdict.abandoned {
            "abandoned"
        } else {
            match verdict.outcome {
                JobState::Succeeded => "succeeded",
                _ => "failed",
            }
        };

        tracing::info!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            outcome,
            charged = job.charged,
            refund,
            reason = verdict.reason.as_deref(),
            "async job settled"
        );

        if let Some(mut slot) = self.inner.jobs.get_mut(&job.job_id)
            && let Some(tracked) = slot.value_mut()
        {
            tracked.phase = JobPhase::Settled {
                outcome: verdict.outcome,
                abandoned: verdict.abandoned,
                refunded: refund,
                reason: verdict.reason,
            };
            tracked.settled_at = Some(Instant::now());
        }

        metrics::instruments()
            .reconcile_count
            .add(1, &[KeyValue::new("outcome", outcome)]);

        Ok(Some(refund))
    }

    /// Sweep every poll interval until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sweep_once().await;
                    if report.polled > 0 || report.pruned > 0 {
                        tracing::debug!(
                            polled = report.polled,
                            settled = report.settled,
                            refunded = report.refunded,
                            errors = report.errors,
                            pruned = report.pruned,
                            "reconciliation sweep finished"
                        );
                    }
                }
            }
        }

        tracing::debug!("reconciler stopped");
    }

    pub fn spawn(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(shutdown))
    }
}

fn verdict(job: &TrackedJob, status: Option<JobStatus>, abandoned: bool) -> Option<Verdict> {
    match status.map(|s| (s.status, s.billable_amount, s.failure_reason)) {
        Some((JobState::Succeeded, billable, _)) => Some(Verdict {
            outcome: JobState::Succeeded,
            billable: billable.unwrap_or(job.charged),
            abandoned: false,
            reason: None,
        }),
        Some((JobState::Failed, _, reason)) => Some(Verdict {
            outcome: JobState::Failed,
            billable: 0,
            abandoned: false,
            reason,
        }),
        _ if abandoned => Some(Verdict {
            outcome: JobState::Failed,
            billable: 0,
            abandoned: true,
            reason: Some("no terminal status before the abandon deadline".to_owned()),
        }),
        _ => None,
    }
}
