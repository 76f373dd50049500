use std::sync::Arc;

use rand::Rng;

use crate::{Channel, ChannelError, ChannelHealth, ChannelId, ChannelRegistry, Snapshot, sampling};

/// Priority-tiered weighted-random channel selection
///
/// `retry_index` 0 draws from the highest priority tier; each increment
/// steps one distinct priority value lower, clamping at the lowest tier.
/// Circuit breakers filter channels inside a tier but never remove the
/// tier from the ladder.
pub struct ChannelSelector {
    registry: Arc<ChannelRegistry>,
    health: Arc<ChannelHealth>,
    bias: u64,
}

impl ChannelSelector {
    pub const fn new(registry: Arc<ChannelRegistry>, health: Arc<ChannelHealth>, bias: u64) -> Self {
        Self { registry, health, bias }
    }

    pub const fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub const fn health(&self) -> &Arc<ChannelHealth> {
        &self.health
    }

    /// Select a channel for `(group, model)` at the given retry depth
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotFound`] when no enabled channel with a
    /// closed or half-open circuit serves the pair at any tier
    pub fn select(&self, group: &str, model: &str, retry_index: u32) -> Result<Arc<Channel>, ChannelError> {
        self.select_with(&mut rand::rng(), group, model, retry_index)
    }

    /// [`Self::select`] with a caller-provided random source
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotFound`] when no channel survives filtering
    pub fn select_with<R>(
        &self,
        rng: &mut R,
        group: &str,
        model: &str,
        retry_index: u32,
    ) -> Result<Arc<Channel>, ChannelError>
    where
        R: Rng + ?Sized,
    {
        let snapshot = self.registry.snapshot();
        let serving = serving(&snapshot, group, model);

        let not_found = || ChannelError::NotFound {
            group: group.to_owned(),
            model: model.to_owned(),
        };

        // Tiers come from configuration alone so an open circuit never shifts
        // the retry ladder
        let tiers = distinct_priorities(&serving);
        let last = tiers.len().checked_sub(1).ok_or_else(not_found)?;
        let start = usize::try_from(retry_index).unwrap_or(usize::MAX).min(last);

        // A tier emptied by open circuits falls through to the next lower
        // tier, then to the nearest higher one
        let order = tiers[start..].iter().chain(tiers[..start].iter().rev());

        for &priority in order {
            let mut tier: Vec<&Arc<Channel>> = serving
                .iter()
                .copied()
                .filter(|c| c.priority == priority && self.health.is_available(c.id))
                .collect();

            while let Some(picked) = sampling::pick(&tier, self.bias, |c| c.weight, rng) {
                let channel = Arc::clone(*picked);

                if self.health.admit(channel.id) {
                    tracing::debug!(
                        channel_id = channel.id,
                        group,
                        model,
                        retry_index,
                        priority,
                        tier_size = tier.len(),
                        "channel selected"
                    );
                    return Ok(channel);
                }

                // Lost the half-open trial slot to a concurrent request
                tier.retain(|c| c.id != channel.id);
            }
        }

        Err(not_found())
    }

    /// Distinct priority tiers of enabled channels serving `(group, model)`, highest first
    pub fn tiers(&self, group: &str, model: &str) -> Vec<i64> {
        let snapshot = self.registry.snapshot();
        distinct_priorities(&serving(&snapshot, group, model))
    }

    /// Report a successful attempt on a channel
    pub fn record_success(&self, channel: ChannelId) {
        self.health.record_success(channel);
    }

    /// Report a channel-level failure
    ///
    /// With `auto_disable`, a failure that opens the circuit also turns the
    /// channel's `enabled` flag off in the registry.
    pub fn record_failure(&self, channel: ChannelId) {
        let tripped = self.health.record_failure(channel);

        if tripped
            && self.health.config().auto_disable
            && self.registry.set_enabled(channel, false).is_ok()
        {
            tracing::warn!(channel_id = channel, "channel automatically disabled");
        }
    }
}

fn serving<'a>(snapshot: &'a Snapshot, group: &str, model: &str) -> Vec<&'a Arc<Channel>> {
    snapshot.candidates(group, model).iter().filter(|c| c.enabled).collect()
}

fn distinct_priorities(channels: &[&Arc<Channel>]) -> Vec<i64> {
    let mut tiers: Vec<i64> = channels.iter().map(|c| c.priority).collect();
    tiers.sort_unstable_by(|a, b| b.cmp(a));
    tiers.dedup();
    tiers
}
