//! Centralized retry policy.
//!
//! Every call site that retries uses the same `BackoffPolicy`; only the budget differs
//! (bounded for reports, unbounded for trigger polling, which is periodic anyway).

use std::time::Duration;

use rand::Rng;

use crate::config::RetrySettings;

/// How many attempts a call site may make.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryBudget {
    /// Total attempts, including the first one.
    Bounded(u32),
    Unbounded,
}

/// Exponential backoff: `base * factor^n`, capped at `max`, with optional jitter.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    base: Duration,
    factor: f64,
    max: Duration,
    jitter: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, factor: f64, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            factor: factor.max(1.0),
            max: max.max(base),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.base_delay,
            settings.factor,
            settings.max_delay,
            settings.jitter,
        )
    }

    /// Delay before retry number `retry` (0 = first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        let exp = self.factor.powi(retry.min(64) as i32);
        let raw = self.base.as_secs_f64() * exp;
        let capped = raw.min(self.max.as_secs_f64());
        let jittered = if self.jitter > 0.0 {
            let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            (capped * (1.0 + spread)).min(self.max.as_secs_f64())
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }

    pub fn start(&self, budget: RetryBudget) -> Backoff {
        Backoff {
            policy: self.clone(),
            budget,
            failures: 0,
        }
    }
}

/// Per-call retry state created by [`BackoffPolicy::start`].
#[derive(Clone, Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    budget: RetryBudget,
    failures: u32,
}

impl Backoff {
    /// Record a failed attempt and return how long to wait before the next one,
    /// or `None` when the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if let RetryBudget::Bounded(attempts) = self.budget {
            if self.failures >= attempts {
                return None;
            }
        }
        Some(self.policy.delay(self.failures - 1))
    }

    /// Failed attempts since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
