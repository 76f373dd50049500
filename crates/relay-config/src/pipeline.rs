use std::time::Duration;

use serde::Deserialize;

/// Request pipeline timeouts and hold release policy
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Maximum silence between upstream chunks before the channel is treated as failed
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout: String,
    /// Overall upper bound for a single upstream attempt
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    /// Release calls made for a hold before it is deferred
    #[serde(default = "default_release_attempts")]
    pub release_attempts: u32,
    /// Pause before the second release call; doubles after each failure
    #[serde(default = "default_release_backoff")]
    pub release_backoff: String,
    /// How often deferred releases are retried in the background
    #[serde(default = "default_release_sweep_interval")]
    pub release_sweep_interval: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_timeout: default_chunk_timeout(),
            request_timeout: default_request_timeout(),
            release_attempts: default_release_attempts(),
            release_backoff: default_release_backoff(),
            release_sweep_interval: default_release_sweep_interval(),
        }
    }
}

impl PipelineConfig {
    /// Parsed chunk timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is invalid
    pub fn chunk_timeout(&self) -> Result<Duration, String> {
        crate::parse_duration(&self.chunk_timeout)
    }

    /// Parsed request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is invalid
    pub fn request_timeout(&self) -> Result<Duration, String> {
        crate::parse_duration(&self.request_timeout)
    }

    /// Parsed release backoff
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is invalid
    pub fn release_backoff(&self) -> Result<Duration, String> {
        crate::parse_duration(&self.release_backoff)
    }

    /// Parsed deferred release sweep interval
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is invalid
    pub fn release_sweep_interval(&self) -> Result<Duration, String> {
        crate::parse_duration(&self.release_sweep_interval)
    }
}

fn default_chunk_timeout() -> String {
    "60s".to_string()
}

fn default_request_timeout() -> String {
    "10m".to_string()
}

const fn default_release_attempts() -> u32 {
    3
}

fn default_release_backoff() -> String {
    "50ms".to_string()
}

fn default_release_sweep_interval() -> String {
    "5s".to_string()
}
