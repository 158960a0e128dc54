//! 重试退避
//!
//! `next_delay` is deterministic so retry timing can be tested without
//! timers; jitter is a separate step.

use rand::Rng;
use std::time::Duration;

use tiering_core::config::TaskQueueConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &TaskQueueConfig) -> Self {
        Self::new(
            Duration::from_secs(config.base_delay_seconds),
            Duration::from_secs(config.max_delay_seconds),
            config.jitter_factor,
        )
    }

    /// `base * 2^(attempts-1)`, capped at the maximum delay. Attempt counts
    /// below one are treated as the first attempt.
    pub fn next_delay(&self, attempts: i32) -> Duration {
        let exponent = (attempts.max(1) - 1).min(31) as u32;
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Spreads `delay` by up to `jitter_factor` in either direction, never
    /// past the maximum.
    pub fn jittered(&self, delay: Duration) -> Duration {
        let spread = delay.as_secs_f64() * self.jitter_factor;
        if spread <= 0.0 {
            return delay;
        }
        let offset = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0)).min(self.max_delay)
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&TaskQueueConfig::default())
    }
}
