use std::collections::BTreeSet;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Upstream channel configuration and selection policy
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelsConfig {
    /// Constant added to every declared weight before sampling
    ///
    /// Keeps zero-weight channels selectable with a small probability
    #[serde(default = "default_weight_bias")]
    pub weight_bias: u64,
    /// Maximum number of channel retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-channel circuit breaker
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Statically configured channels
    #[serde(default)]
    pub list: Vec<ChannelConfig>,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            weight_bias: default_weight_bias(),
            max_retries: default_max_retries(),
            circuit_breaker: CircuitBreakerConfig::default(),
            list: Vec::new(),
        }
    }
}

/// A single upstream endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Unique channel identifier
    pub id: u64,
    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,
    /// Upstream base URL (e.g. `https://api.example.com/v1`)
    pub base_url: Url,
    /// Credential presented to the upstream
    #[serde(default)]
    pub credential: Option<SecretString>,
    /// Whether the channel starts enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Priority tier, higher is preferred
    #[serde(default)]
    pub priority: i64,
    /// Relative weight within the tier
    #[serde(default)]
    pub weight: u64,
    /// Tenant groups this channel serves
    pub groups: BTreeSet<String>,
    /// Model names this channel serves
    pub models: BTreeSet<String>,
    /// Optional deployment tag for bulk updates
    #[serde(default)]
    pub tag: Option<String>,
}

/// Circuit breaker thresholds for channel health
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Errors within the window that open the circuit
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    /// Error counting window in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Seconds an open circuit waits before allowing a trial
    #[serde(default = "default_recovery_seconds")]
    pub recovery_seconds: u64,
    /// Also flip the channel's `enabled` flag off when the circuit opens
    #[serde(default)]
    pub auto_disable: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            window_seconds: default_window_seconds(),
            recovery_seconds: default_recovery_seconds(),
            auto_disable: false,
        }
    }
}

const fn default_weight_bias() -> u64 {
    10
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_true() -> bool {
    true
}

const fn default_error_threshold() -> u32 {
    5
}

const fn default_window_seconds() -> u64 {
    60
}

const fn default_recovery_seconds() -> u64 {
    30
}
