#![allow(clippy::must_use_candidate)]

pub mod billing;
pub mod channels;
mod env;
pub mod health;
mod loader;
pub mod pipeline;
pub mod reconciler;
pub mod server;
pub mod telemetry;

use std::time::Duration;

use serde::Deserialize;

pub use billing::*;
pub use channels::*;
pub use health::*;
pub use pipeline::*;
pub use reconciler::*;
pub use server::*;
pub use telemetry::TelemetryConfig;

/// Top-level gateway configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream channels and selection policy
    #[serde(default)]
    pub channels: ChannelsConfig,
    /// Metered billing configuration
    #[serde(default)]
    pub billing: BillingConfig,
    /// Request pipeline timeouts
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Settlement reconciler for asynchronous jobs
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}

/// Parse a human-readable duration such as `"30s"` or `"1h"`
///
/// # Errors
///
/// Returns a description of the problem when the string is not a valid duration
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    duration_str::parse(value).map_err(|e| format!("invalid duration '{value}': {e}"))
}
