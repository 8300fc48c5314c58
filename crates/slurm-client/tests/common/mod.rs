// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for slurm-client integration tests.
//!
//! [`ScriptedTransport`] answers discovery from a fixed release and every
//! other request from a queue of scripted outcomes, so breaker and retry
//! timing can be driven under paused tokio time without sockets.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use slurm_client::{
    BreakerConfig, ClientConfig, HttpRequest, HttpResponse, RetryPolicy, Transport, TransportError,
};

pub const ENDPOINT: &str = "http://slurm.test:6820";

pub fn openapi_doc(release: &str) -> Value {
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Slurm REST API",
            "version": format!("Slurm-{}&openapi/slurmctld&openapi/slurmdbd", release),
            "x-slurm": {"release": release}
        }
    })
}

pub fn ok(body: Value) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(200, body.to_string().into_bytes()))
}

pub fn status(code: u16) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(code, b"{\"errors\":[]}".to_vec()))
}

pub fn refused() -> Result<HttpResponse, TransportError> {
    Err(TransportError::Connect("connection refused".into()))
}

/// In-memory transport with scripted outcomes.
pub struct ScriptedTransport {
    release: Mutex<String>,
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    discovery_calls: AtomicUsize,
    calls: AtomicUsize,
    latency: Option<Duration>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(release: &str) -> Self {
        Self {
            release: Mutex::new(release.to_string()),
            script: Mutex::new(VecDeque::new()),
            discovery_calls: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            latency: None,
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Delay every answer, so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_release(&self, release: &str) {
        *self.release.lock().unwrap() = release.to_string();
    }

    pub fn push(&self, outcome: Result<HttpResponse, TransportError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn push_n(&self, n: usize, outcome: impl Fn() -> Result<HttpResponse, TransportError>) {
        for _ in 0..n {
            self.push(outcome());
        }
    }

    /// Non-discovery calls that reached the transport.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn discovery_calls(&self) -> usize {
        self.discovery_calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if request.url.ends_with("/openapi/v3") {
            self.discovery_calls.fetch_add(1, Ordering::SeqCst);
            let release = self.release.lock().unwrap().clone();
            return ok(openapi_doc(&release));
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(request.url.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ok(json!({})))
    }
}

/// Config with fast, deterministic retries.
pub fn config() -> ClientConfig {
    ClientConfig::new(ENDPOINT)
        .with_retry_policy(
            RetryPolicy::default()
                .with_max_attempts(3)
                .with_base_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_secs(1))
                .with_jitter_fraction(0.0),
        )
        .with_breaker(BreakerConfig::new(5, Duration::from_secs(30)))
}
