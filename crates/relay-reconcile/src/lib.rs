//! Settlement of asynchronous generation jobs
//!
//! Jobs that outlive the request that submitted them are charged up front and
//! converged to their final ledger state by a background sweep.

mod error;
mod job;
mod reconciler;
mod source;

pub use error::ReconcileError;
pub use job::{JobPhase, JobState, JobStatus, JobView, TrackedJob};
pub use reconciler::{Reconciler, ReconcilerSettings, SweepReport};
pub use source::{HttpJobStatusSource, JobStatusSource};
