//! Reconnect delays: exponential growth from a base delay up to a cap.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Randomization applied to each delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    /// Delay is exactly the ceiling.
    None,
    /// Uniform in `[0, ceiling]`.
    #[default]
    Full,
    /// Uniform in `[ceiling / 2, ceiling]`.
    Equal,
}

/// Stateful backoff for one channel.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: Jitter,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: Jitter) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter,
            attempt: 0,
        }
    }

    /// Upper bound of the next delay: `base * 2^attempt`, capped at `max`.
    pub fn ceiling(&self) -> Duration {
        let factor = 1u32 << self.attempt.min(20);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Delay before the next attempt. Advances the exponent.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        let ceiling_ms = ceiling.as_millis() as u64;
        let delay_ms = match self.jitter {
            Jitter::None => ceiling_ms,
            Jitter::Full => rand::thread_rng().gen_range(0..=ceiling_ms),
            Jitter::Equal => {
                let half = ceiling_ms / 2;
                half + rand::thread_rng().gen_range(0..=ceiling_ms - half)
            }
        };
        Duration::from_millis(delay_ms)
    }

    /// Back to the base delay. Called on every successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
