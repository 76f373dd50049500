use std::time::Duration;

use serde::Deserialize;

/// Settlement reconciler for asynchronous generation jobs
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcilerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// How often pending jobs are re-queried
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// Jobs pending longer than this are treated as failed
    #[serde(default = "default_abandon_after")]
    pub abandon_after: String,
    /// How long settled jobs are remembered before they are forgotten
    #[serde(default = "default_settled_retention")]
    pub settled_retention: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval: default_poll_interval(),
            abandon_after: default_abandon_after(),
            settled_retention: default_settled_retention(),
        }
    }
}

impl ReconcilerConfig {
    /// Parsed poll interval
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is invalid
    pub fn poll_interval(&self) -> Result<Duration, String> {
        crate::parse_duration(&self.poll_interval)
    }

    /// Parsed abandonment threshold
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is invalid
    pub fn abandon_after(&self) -> Result<Duration, String> {
        crate::parse_duration(&self.abandon_after)
    }

    /// Parsed retention for settled jobs
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is invalid
    pub fn settled_retention(&self) -> Result<Duration, String> {
        crate::parse_duration(&self.settled_retention)
    }
}

fn default_poll_interval() -> String {
    "15s".to_string()
}

fn default_abandon_after() -> String {
    "1h".to_string()
}

fn default_settled_retention() -> String {
    "24h".to_string()
}
