// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-call cancellation and deadlines.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a call stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller cancelled the token.
    Cancelled,
    /// The caller's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "call cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Caller-supplied cancellation token and optional deadline.
///
/// Every client operation takes a `&CallContext`. Both the outbound request
/// and any retry backoff sleep stop as soon as the token is cancelled or the
/// deadline passes.
///
/// ```ignore
/// let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
/// let jobs = client.jobs().list(&ctx, &JobListOptions::default()).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that never expires on its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Expire at `deadline`. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Expire `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A context sharing this deadline whose token is cancelled with ours
    /// but can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every child.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the reason if the context is already done.
    pub fn check(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            return Some(CancelReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> CancelReason {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;

                    _ = self.token.cancelled() => CancelReason::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => CancelReason::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                CancelReason::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_resolves_done() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
        assert_eq!(ctx.check(), None);
        assert_eq!(ctx.done().await, CancelReason::DeadlineExceeded);
        assert_eq!(ctx.check(), Some(CancelReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancel_resolves_done() {
        let ctx = CallContext::new();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.done().await });
        ctx.cancel();
        assert_eq!(handle.await.unwrap(), CancelReason::Cancelled);
    }

    #[test]
    fn test_earlier_deadline_is_kept() {
        let now = Instant::now();
        let ctx = CallContext::new()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_child_is_cancelled_with_parent() {
        let parent = CallContext::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.cancellation_token().is_cancelled());
        parent.cancel();
        assert_eq!(parent.child().check(), Some(CancelReason::Cancelled));
    }
}
