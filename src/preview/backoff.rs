//! Reconnect schedule for the preview socket

use crate::config::ReconnectConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Doubling reconnect schedule capped at `max_backoff_ms`.
///
/// Each delay is drawn from the upper half of the current step, so clients
/// dropped together do not all come back at the same instant.
#[derive(Debug)]
pub(crate) struct Backoff {
    step_ms: u64,
    max_ms: u64,
    rng: StdRng,
}

impl Backoff {
    pub(crate) fn new(config: &ReconnectConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub(crate) fn with_rng(config: &ReconnectConfig, rng: StdRng) -> Self {
        Self {
            step_ms: config.initial_backoff_ms,
            max_ms: config.max_backoff_ms.max(config.initial_backoff_ms),
            rng,
        }
    }

    /// Delay before the next attempt; advances the schedule
    pub(crate) fn next_delay(&mut self) -> Duration {
        let ceiling = self.step_ms;
        self.step_ms = self.step_ms.saturating_mul(2).min(self.max_ms);

        if ceiling < 2 {
            return Duration::from_millis(ceiling);
        }
        Duration::from_millis(self.rng.gen_range(ceiling - ceiling / 2..=ceiling))
    }
}
