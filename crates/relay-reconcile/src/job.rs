use std::time::SystemTime;

use relay_channel::ChannelId;
use relay_ledger::Amount;
use serde::{Deserialize, Serialize};

/// An asynchronous job whose provisional charge has been taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedJob {
    pub job_id: String,
    pub tenant_id: String,
    /// Channel the job was submitted to
    pub channel_id: ChannelId,
    /// Provisional charge committed when the job was registered
    pub charged: Amount,
    #[serde(skip)]
    pub submitted_at: SystemTime,
}

/// Upstream-reported state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[serde(alias = "queued", alias = "in_progress", alias = "running")]
    Pending,
    #[serde(alias = "completed", alias = "success")]
    Succeeded,
    #[serde(alias = "failure", alias = "cancelled", alias = "expired")]
    Failed,
}

/// Result of one status poll
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub job_id: String,
    pub status: JobState,
    /// Amount the job actually costs, when known
    #[serde(default)]
    pub billable_amount: Option<Amount>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// Where a tracked job is in reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum JobPhase {
    /// Awaiting a terminal status
    Pending,
    /// Converged; `refunded` was credited back to the tenant
    Settled {
        outcome: JobState,
        abandoned: bool,
        refunded: Amount,
        reason: Option<String>,
    },
}

/// Public view of a tracked job
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: TrackedJob,
    #[serde(flatten)]
    pub phase: JobPhase,
}
