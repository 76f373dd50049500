use relay_config::PricingConfig;
use relay_ledger::Amount;

/// Converts token counts into quota units
#[derive(Debug, Clone)]
pub struct Pricing {
    config: PricingConfig,
}

impl Pricing {
    pub const fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    /// `ceil((prompt + completion * completion_ratio) * model_ratio)`
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn quota(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> Amount {
        let weighted = (completion_tokens as f64).mul_add(self.config.completion_ratio, prompt_tokens as f64);
        let quota = (weighted * self.config.model_ratio(model)).ceil();

        if quota >= Amount::MAX as f64 {
            Amount::MAX
        } else {
            (quota as Amount).max(0)
        }
    }
}
