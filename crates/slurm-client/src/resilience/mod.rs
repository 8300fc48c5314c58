// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resilient execution: retries with backoff behind a per-endpoint circuit
//! breaker.

mod breaker;
mod pipeline;
mod retry;

pub use breaker::{
    BreakerConfig, BreakerRegistry, BreakerSnapshot, BreakerState, CircuitBreaker, Permit,
};
pub use pipeline::Pipeline;
pub use retry::RetryPolicy;
