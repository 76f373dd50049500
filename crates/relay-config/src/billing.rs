use indexmap::IndexMap;
use serde::Deserialize;

/// Metered billing configuration
///
/// When disabled the pipeline skips the hold and finalize stages entirely
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BillingConfig {
    /// Whether billing is enabled
    #[serde(default)]
    pub enabled: bool,
    /// Completion tokens assumed for the reservation when the payload has no `max_tokens`
    #[serde(default = "default_estimated_completion_tokens")]
    pub estimated_completion_tokens: u64,
    /// Token-to-quota conversion ratios
    #[serde(default)]
    pub pricing: PricingConfig,
    /// Initial balances for the in-process ledger
    #[serde(default)]
    pub tenants: Vec<TenantSeed>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            estimated_completion_tokens: default_estimated_completion_tokens(),
            pricing: PricingConfig::default(),
            tenants: Vec::new(),
        }
    }
}

/// Quota pricing ratios
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Ratio applied to models without an explicit entry
    #[serde(default = "default_ratio")]
    pub default_ratio: f64,
    /// Multiplier for completion tokens relative to prompt tokens
    #[serde(default = "default_ratio")]
    pub completion_ratio: f64,
    /// Per-model ratio overrides
    #[serde(default)]
    pub models: IndexMap<String, f64>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            default_ratio: default_ratio(),
            completion_ratio: default_ratio(),
            models: IndexMap::new(),
        }
    }
}

impl PricingConfig {
    /// Ratio for a model, falling back to the default
    pub fn model_ratio(&self, model: &str) -> f64 {
        self.models.get(model).copied().unwrap_or(self.default_ratio)
    }
}

/// Seed balance for one tenant
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantSeed {
    pub id: String,
    pub balance: i64,
}

const fn default_estimated_completion_tokens() -> u64 {
    256
}

#[allow(clippy::missing_const_for_fn)]
fn default_ratio() -> f64 {
    1.0
}
