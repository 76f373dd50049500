//! Channel health tracking with a circuit breaker
//!
//! Failures are counted inside a sliding window. Reaching the threshold opens
//! the circuit and removes the channel from selection. Once the recovery
//! window has elapsed the circuit is half-open and admits exactly one trial
//! request; the outcome of that trial closes or re-opens it.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use relay_config::CircuitBreakerConfig;

use crate::ChannelId;

/// Circuit breaker state for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Channel is failing and excluded from selection
    Open,
    /// Recovery window elapsed; one trial request may be admitted
    HalfOpen,
}

struct Breaker {
    failures: u32,
    window_started: Instant,
    opened_at: Option<Instant>,
    /// Start of the outstanding half-open trial
    trial_started: Option<Instant>,
}

impl Breaker {
    fn new(now: Instant) -> Self {
        Self {
            failures: 0,
            window_started: now,
            opened_at: None,
            trial_started: None,
        }
    }

    fn state(&self, now: Instant, recovery: Duration) -> CircuitState {
        match self.opened_at {
            None => CircuitState::Closed,
            Some(opened) if now.saturating_duration_since(opened) >= recovery => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }

    /// A trial that never reported back stops blocking after `lease`
    fn trial_outstanding(&self, now: Instant, lease: Duration) -> bool {
        self.trial_started
            .is_some_and(|started| now.saturating_duration_since(started) < lease)
    }
}

/// Per-channel circuit breakers
pub struct ChannelHealth {
    breakers: DashMap<ChannelId, Breaker>,
    config: CircuitBreakerConfig,
}

impl ChannelHealth {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    const fn recovery(&self) -> Duration {
        Duration::from_secs(self.config.recovery_seconds)
    }

    fn trial_lease(&self) -> Duration {
        self.recovery().max(Duration::from_secs(1))
    }

    /// Current circuit state for a channel
    pub fn state(&self, channel: ChannelId) -> CircuitState {
        self.breakers
            .get(&channel)
            .map_or(CircuitState::Closed, |b| b.state(Instant::now(), self.recovery()))
    }

    /// Whether the channel may be offered for selection
    ///
    /// A half-open channel is only offered while no trial is outstanding.
    pub fn is_available(&self, channel: ChannelId) -> bool {
        let Some(breaker) = self.breakers.get(&channel) else {
            return true;
        };

        let now = Instant::now();
        match breaker.state(now, self.recovery()) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => !breaker.trial_outstanding(now, self.trial_lease()),
        }
    }

    /// Admit one request to the channel
    ///
    /// Closed circuits always admit. A half-open circuit admits only the
    /// caller that claims its trial slot; everyone else is turned away until
    /// the trial reports a result.
    pub fn admit(&self, channel: ChannelId) -> bool {
        let Some(mut breaker) = self.breakers.get_mut(&channel) else {
            return true;
        };

        let now = Instant::now();
        match breaker.state(now, self.recovery()) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen if breaker.trial_outstanding(now, self.trial_lease()) => false,
            CircuitState::HalfOpen => {
                breaker.trial_started = Some(now);
                tracing::debug!(channel_id = channel, "half-open trial admitted");
                true
            }
        }
    }

    /// Record a successful attempt, closing the circuit
    pub fn record_success(&self, channel: ChannelId) {
        let now = Instant::now();
        let mut breaker = self.breakers.entry(channel).or_insert_with(|| Breaker::new(now));

        *breaker = Breaker::new(now);
    }

    /// Record a failed attempt
    ///
    /// Returns `true` when this failure opened a closed circuit. A failed
    /// trial re-opens the circuit for another recovery window.
    pub fn record_failure(&self, channel: ChannelId) -> bool {
        let now = Instant::now();
        let window = Duration::from_secs(self.config.window_seconds);
        let mut breaker = self.breakers.entry(channel).or_insert_with(|| Breaker::new(now));

        if now.saturating_duration_since(breaker.window_started) >= window {
            breaker.failures = 0;
            breaker.window_started = now;
        }
        breaker.failures = breaker.failures.saturating_add(1);

        let in_trial = breaker.trial_started.take().is_some();
        if breaker.failures < self.config.error_threshold && !in_trial {
            return false;
        }

        let was_closed = breaker.opened_at.replace(now).is_none();
        let failures = breaker.failures;
        drop(breaker);

        if was_closed {
            tracing::warn!(channel_id = channel, failures, "circuit opened for channel");
        } else {
            tracing::debug!(channel_id = channel, failures, "circuit re-armed");
        }

        was_closed
    }

    /// Forget all state for a channel, e.g. after it is removed or replaced
    pub fn reset(&self, channel: ChannelId) {
        self.breakers.remove(&channel);
    }
}
