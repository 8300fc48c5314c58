// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The execution pipeline every outbound call goes through.
//!
//! One logical call takes one breaker permit. Retries happen inside that
//! permit, and only the final outcome is reported to the breaker:
//!
//! - success, or a non-retryable answer from the target: success
//! - retryable failure after the last attempt: failure
//! - cancellation or deadline: the permit is released untouched

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::breaker::BreakerRegistry;
use super::retry::RetryPolicy;
use crate::auth::AuthProvider;
use crate::classify::{ClassifiedError, ErrorKind, Failure, classify};
use crate::context::CallContext;
use crate::transport::{HttpRequest, HttpResponse, Transport};

pub struct Pipeline {
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthProvider>,
    retry: RetryPolicy,
    breakers: Arc<BreakerRegistry>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("retry", &self.retry)
            .field("breakers", &self.breakers.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
        retry: RetryPolicy,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            transport,
            auth,
            retry,
            breakers,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Run `request` against `endpoint`. `Ok` only for 2xx responses.
    #[instrument(
        skip(self, ctx, request),
        fields(method = request.method.as_str(), url = %request.url)
    )]
    pub async fn execute(
        &self,
        ctx: &CallContext,
        endpoint: &str,
        request: HttpRequest,
    ) -> Result<HttpResponse, ClassifiedError> {
        if let Some(reason) = ctx.check() {
            return Err(classify(Failure::Cancelled(reason)));
        }

        let breaker = self.breakers.get(endpoint);
        let Some(permit) = breaker.try_acquire() else {
            debug!(endpoint, "Circuit open, failing fast");
            return Err(ClassifiedError::circuit_open(endpoint));
        };

        let outcome = self.run_attempts(ctx, &request).await;
        match &outcome {
            Ok(_) => breaker.record_success(permit),
            Err(err) if err.kind() == ErrorKind::Cancelled => breaker.release(permit),
            Err(err) if err.is_retryable() => breaker.record_failure(permit),
            Err(_) => breaker.record_success(permit),
        }
        outcome
    }

    async fn run_attempts(
        &self,
        ctx: &CallContext,
        request: &HttpRequest,
    ) -> Result<HttpResponse, ClassifiedError> {
        let mut attempt: u32 = 0;
        loop {
            let err = match self.attempt_once(ctx, request.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            attempt += 1;

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= self.retry.max_attempts {
                warn!(attempts = attempt, error = %err, "Retries exhausted");
                return Err(err);
            }

            let delay = self.retry.delay_for_attempt(attempt - 1);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after backoff"
            );

            tokio::select! {
                biased;

                reason = ctx.done() => {
                    debug!(%reason, "Backoff interrupted");
                    return Err(classify(Failure::Cancelled(reason)));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt_once(
        &self,
        ctx: &CallContext,
        mut request: HttpRequest,
    ) -> Result<HttpResponse, ClassifiedError> {
        let headers = tokio::select! {
            biased;

            reason = ctx.done() => return Err(classify(Failure::Cancelled(reason))),
            headers = self.auth.headers() => headers.map_err(|e| classify(Failure::Auth(e)))?,
        };
        request.headers.extend(headers);

        let response = tokio::select! {
            biased;

            reason = ctx.done() => return Err(classify(Failure::Cancelled(reason))),
            result = self.transport.execute(request) => {
                result.map_err(|e| classify(Failure::Transport(e)))?
            }
        };

        if response.is_success() {
            Ok(response)
        } else {
            Err(classify(Failure::Status {
                status: response.status,
                body: &response.body,
            }))
        }
    }
}
