// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-endpoint circuit breaker.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────► Open
//!     ▲                                │ open_timeout elapsed,
//!     │ trial succeeds                 │ next caller becomes the trial
//!     │                                ▼
//!     └──────────────────────────── HalfOpen ──► Open (trial fails)
//! ```
//!
//! All transitions happen under one mutex, so concurrent outcomes never
//! leave the failure counter and the state out of step.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thresholds for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial call.
    pub open_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            open_timeout,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold < 1 {
            return Err(Error::Config("failure_threshold must be at least 1".into()));
        }
        if self.open_timeout.is_zero() {
            return Err(Error::Config("open_timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub trial_in_flight: bool,
}

/// Admission granted by [`CircuitBreaker::try_acquire`].
///
/// Exactly one of `record_success`, `record_failure` or `release` must be
/// called with it once the call finishes.
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub enum Permit {
    /// Admitted while closed.
    Normal,
    /// The single half-open trial call.
    Trial,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    // The guarded state stays consistent even if a holder panicked, since
    // every mutation is a plain field assignment.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask to send a call. `None` means fail fast without a network attempt.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Some(Permit::Normal),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened| opened.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.open_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(endpoint = %self.endpoint, "Circuit breaker half-open, sending trial call");
                    Some(Permit::Trial)
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Permit::Trial)
                }
            }
        }
    }

    pub fn record_success(&self, permit: Permit) {
        let mut inner = self.lock();
        match permit {
            Permit::Trial => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!(endpoint = %self.endpoint, "Circuit breaker closed");
            }
            // A call admitted before the breaker opened says nothing about
            // the target now.
            Permit::Normal if inner.state == BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            Permit::Normal => {}
        }
    }

    pub fn record_failure(&self, permit: Permit) {
        let mut inner = self.lock();
        match permit {
            Permit::Trial => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                warn!(
                    endpoint = %self.endpoint,
                    consecutive_failures = inner.consecutive_failures,
                    "Circuit breaker trial failed, re-opening"
                );
            }
            Permit::Normal if inner.state == BreakerState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        endpoint = %self.endpoint,
                        consecutive_failures = inner.consecutive_failures,
                        open_timeout_ms = self.config.open_timeout.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                }
            }
            Permit::Normal => {}
        }
    }

    /// Give the permit back without judging the target, e.g. on cancellation.
    pub fn release(&self, permit: Permit) {
        if permit == Permit::Trial {
            self.lock().trial_in_flight = false;
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
            trial_in_flight: inner.trial_in_flight,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Long-lived breakers keyed by endpoint, owned by one client.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// The breaker for `endpoint`, created on first use.
    pub fn get(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(endpoint) {
            return Arc::clone(existing.value());
        }
        self.breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(endpoint, self.config.clone())))
            .value()
            .clone()
    }

    pub fn snapshot(&self, endpoint: &str) -> Option<BreakerSnapshot> {
        self.breakers.get(endpoint).map(|b| b.snapshot())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    pub fn clear(&self) {
        self.breakers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "http://slurm:6820",
            BreakerConfig::new(threshold, Duration::from_secs(30)),
        )
    }

    fn fail(b: &CircuitBreaker) {
        let permit = b.try_acquire().unwrap();
        b.record_failure(permit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let b = breaker(3);
        fail(&b);
        fail(&b);
        assert_eq!(b.snapshot().state, BreakerState::Closed);
        fail(&b);

        let snap = b.snapshot();
        assert_eq!(snap.state, BreakerState::Open);
        assert_eq!(snap.consecutive_failures, 3);
        assert!(snap.opened_at.is_some());
        assert!(b.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_counter() {
        let b = breaker(3);
        fail(&b);
        fail(&b);
        let permit = b.try_acquire().unwrap();
        b.record_success(permit);
        assert_eq!(b.snapshot().consecutive_failures, 0);
        fail(&b);
        assert_eq!(b.snapshot().state, BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_after_timeout() {
        let b = breaker(1);
        fail(&b);
        tokio::time::advance(Duration::from_secs(30)).await;

        let trial = b.try_acquire();
        assert_eq!(trial, Some(Permit::Trial));
        assert_eq!(b.snapshot().state, BreakerState::HalfOpen);
        assert!(b.try_acquire().is_none());

        b.record_success(Permit::Trial);
        let snap = b.snapshot();
        assert_eq!(snap.state, BreakerState::Closed);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.opened_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_with_fresh_timestamp() {
        let b = breaker(1);
        fail(&b);
        let first_opened = b.snapshot().opened_at.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        let trial = b.try_acquire().unwrap();
        b.record_failure(trial);

        let snap = b.snapshot();
        assert_eq!(snap.state, BreakerState::Open);
        assert!(snap.opened_at.unwrap() > first_opened);
        assert!(b.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_trial_frees_slot() {
        let b = breaker(1);
        fail(&b);
        tokio::time::advance(Duration::from_secs(30)).await;

        let trial = b.try_acquire().unwrap();
        b.release(trial);
        assert_eq!(b.snapshot().consecutive_failures, 1);
        assert_eq!(b.try_acquire(), Some(Permit::Trial));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_success_does_not_close() {
        let b = breaker(1);
        let stale = b.try_acquire().unwrap();
        fail(&b);
        b.record_success(stale);
        assert_eq!(b.snapshot().state, BreakerState::Open);
    }

    #[test]
    fn test_registry_reuses_breakers() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let a = registry.get("http://a");
        let again = registry.get("http://a");
        let b = registry.get("http://b");
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(BreakerConfig::default().validate().is_ok());
        assert!(BreakerConfig::new(0, Duration::from_secs(1)).validate().is_err());
        assert!(BreakerConfig::new(1, Duration::ZERO).validate().is_err());
    }
}
