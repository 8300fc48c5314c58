// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry policy with capped exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// How many times a retryable call is attempted and how long to wait between
/// attempts.
///
/// The delay before retry `k` (0-indexed) is
/// `min(max_delay, base_delay * multiplier^k)` scaled by a factor drawn
/// uniformly from `[1 - jitter_fraction, 1 + jitter_fraction]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Must be at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor between consecutive delays. Must be at least 1.0.
    pub multiplier: f64,
    /// Jitter spread in `[0, 1]`.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter_fraction: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter_fraction(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = jitter_fraction;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::Config("multiplier must be at least 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(Error::Config("jitter_fraction must be in [0, 1]".into()));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::Config("base_delay must not exceed max_delay".into()));
        }
        Ok(())
    }

    /// Un-jittered delay before retry `attempt` (0-indexed).
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let max_nanos = self.max_delay.as_nanos() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let grown = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        let capped = if grown.is_finite() {
            grown.min(max_nanos)
        } else {
            max_nanos
        };
        Duration::from_nanos(capped.round() as u64)
    }

    /// Inclusive bounds the jittered delay for `attempt` falls in.
    pub fn delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let nominal = self.nominal_delay(attempt).as_secs_f64();
        (
            Duration::from_secs_f64(nominal * (1.0 - self.jitter_fraction)),
            Duration::from_secs_f64(nominal * (1.0 + self.jitter_fraction)),
        )
    }

    /// Jittered delay before retry `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter_fraction <= 0.0 {
            return nominal;
        }
        let factor = rand::thread_rng()
            .gen_range((1.0 - self.jitter_fraction)..=(1.0 + self.jitter_fraction));
        Duration::from_secs_f64(nominal.as_secs_f64() * factor)
    }
}
