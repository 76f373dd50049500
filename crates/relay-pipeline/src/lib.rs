//! Request lifecycle for metered generation
//!
//! A request is admitted, routed to a channel, reserved against the
//! tenant's balance, streamed from the upstream and finally settled.

#![allow(clippy::must_use_candidate)]

mod client;
mod context;
mod error;
mod orchestrator;
mod pricing;
mod stage;
#[cfg(test)]
mod testing;
pub mod tokenize;
pub mod upstream;

pub use client::{ClientEvent, ClientLink};
pub use context::RequestContext;
pub use error::{PipelineError, UpstreamError};
pub use orchestrator::{Admission, ExecutionReport, Orchestrator, PipelineSettings, Settlement};
pub use pricing::Pricing;
pub use stage::Stage;
