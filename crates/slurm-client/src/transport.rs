// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP transport seam.
//!
//! Everything above this module talks to the daemon through the
//! [`Transport`] trait, so tests can swap the network for a scripted
//! in-memory implementation.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// HTTP methods used by the Slurm REST API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

/// A fully resolved outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a JSON body and the matching content type.
    pub fn with_json(mut self, body: &serde_json::Value) -> Self {
        self.body = Some(body.to_string().into_bytes());
        self.with_header("Content-Type", "application/json")
    }
}

/// A raw response. Non-2xx statuses are still responses, not errors.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced an HTTP response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Sends one HTTP request and returns the raw response.
///
/// Implementations must not retry on their own; retries belong to the
/// resilience pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

// ============================================================================
// reqwest implementation
// ============================================================================

/// [`Transport`] backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("slurm-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client, keeping its pool and TLS settings.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Io(e.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };

        debug!(method = request.method.as_str(), url = %request.url, "Sending request");

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        debug!(status, bytes = body.len(), "Received response");

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_reqwest_transport_sends_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/slurm/v0.0.42/job/submit"))
            .and(header("X-SLURM-USER-NAME", "alice"))
            .and(body_json(serde_json::json!({"job": {"name": "a"}})))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let request = HttpRequest::new(
            Method::Post,
            format!("{}/slurm/v0.0.42/job/submit", server.uri()),
        )
        .with_header("X-SLURM-USER-NAME", "alice")
        .with_json(&serde_json::json!({"job": {"name": "a"}}));

        let response = transport.execute(request).await.unwrap();
        assert_eq!(response.status, 200);
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let response = transport
            .execute(HttpRequest::get(format!("{}/slurm/v0.0.42/ping", server.uri())))
            .await
            .unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.body, b"busy");
    }

    #[tokio::test]
    async fn test_connection_refused_is_connect_error() {
        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        let err = transport
            .execute(HttpRequest::get("http://127.0.0.1:1/openapi/v3"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
