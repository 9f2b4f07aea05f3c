// src/dispatch/backoff.rs
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff: the delay after the n-th failed attempt is
/// `base * 2^(n-1)`, capped at `max_delay`; `max_attempts` counts every send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    /// How long one cycle may spend waiting between retries before the
    /// remaining attempts are carried over to the next cycle. `None` retries
    /// inline until a terminal outcome.
    pub inline_budget: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }
        let shift = (failed_attempts - 1).min(31);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Every wait between consecutive attempts, first to last.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|n| self.delay_after(n)).collect()
    }
}

/// `[retry]` section as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default)]
    pub inline_budget_secs: Option<u64>,
}

fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_attempt_timeout_secs() -> u64 {
    15
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            inline_budget_secs: None,
        }
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(s: RetrySettings) -> Self {
        Self {
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            max_attempts: s.max_attempts,
            attempt_timeout: Duration::from_secs(s.attempt_timeout_secs),
            inline_budget: s.inline_budget_secs.map(Duration::from_secs),
        }
    }
}
