// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Failure classification.
//!
//! Every failure that leaves the resilience pipeline is first mapped to a
//! [`ClassifiedError`]. The classification is a pure function of the raw
//! failure and decides both the error kind callers see and whether the
//! pipeline may retry.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthError;
use crate::context::CancelReason;
use crate::transport::TransportError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure taxonomy shared by every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request never got a response (connect failure, timeout, reset).
    Network,
    /// The server answered 500, 502, 503, 504 or 429.
    ServerTransient,
    /// Missing or rejected credentials.
    Authentication,
    /// The request itself was rejected, locally or by the server.
    Validation,
    NotFound,
    /// The negotiated API revision does not offer the operation.
    NotImplemented,
    /// The endpoint's circuit breaker rejected the call.
    CircuitOpen,
    /// The caller cancelled or the deadline passed.
    Cancelled,
    UnsupportedVersion,
    Unknown,
}

impl ErrorKind {
    /// Only network and transient server failures are worth retrying.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::ServerTransient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::ServerTransient => "server_transient",
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::NotImplemented => "not_implemented",
            Self::CircuitOpen => "circuit_open",
            Self::Cancelled => "cancelled",
            Self::UnsupportedVersion => "unsupported_version",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an HTTP status to an error kind.
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        429 | 500 | 502 | 503 | 504 => ErrorKind::ServerTransient,
        401 | 403 => ErrorKind::Authentication,
        400 | 422 => ErrorKind::Validation,
        404 => ErrorKind::NotFound,
        _ => ErrorKind::Unknown,
    }
}

/// One entry of the `errors` array slurmrestd returns with a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl fmt::Display for ApiErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .description
            .as_deref()
            .filter(|d| !d.is_empty())
            .or(self.error.as_deref())
            .unwrap_or("unspecified error");
        match self.error_number {
            Some(n) if n != 0 => write!(f, "{} (error {})", text, n),
            _ => f.write_str(text),
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

/// Extract the `errors` array from a response body, if there is one.
pub fn parse_error_details(body: &[u8]) -> Vec<ApiErrorDetail> {
    serde_json::from_slice::<ErrorEnvelope>(body)
        .map(|envelope| envelope.errors)
        .unwrap_or_default()
}

/// A failure after classification.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    retryable: bool,
    status_code: Option<u16>,
    message: String,
    details: Vec<ApiErrorDetail>,
    #[source]
    cause: Option<BoxError>,
}

impl ClassifiedError {
    /// New error whose retryability follows its kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
            status_code: None,
            message: message.into(),
            details: Vec::new(),
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn circuit_open(endpoint: &str) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("circuit breaker for {} is open", endpoint),
        )
    }

    pub fn cancelled(reason: CancelReason) -> Self {
        Self::new(ErrorKind::Cancelled, reason.to_string())
    }

    /// A 2xx response whose body did not match the expected shape.
    pub fn malformed(message: impl Into<String>, cause: serde_json::Error) -> Self {
        Self::new(ErrorKind::Unknown, message).with_cause(cause)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_details(mut self, details: Vec<ApiErrorDetail>) -> Self {
        self.details = details;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Error entries reported by the server, if any.
    pub fn details(&self) -> &[ApiErrorDetail] {
        &self.details
    }
}

/// A raw failure before classification.
#[derive(Debug)]
pub enum Failure<'a> {
    Transport(TransportError),
    Status { status: u16, body: &'a [u8] },
    Auth(AuthError),
    Cancelled(CancelReason),
}

/// Map a raw failure to a classified error. Pure and deterministic.
pub fn classify(failure: Failure<'_>) -> ClassifiedError {
    match failure {
        Failure::Transport(err) => {
            let kind = match err {
                TransportError::Connect(_) | TransportError::Timeout(_) | TransportError::Io(_) => {
                    ErrorKind::Network
                }
                TransportError::InvalidRequest(_) => ErrorKind::Validation,
            };
            ClassifiedError::new(kind, err.to_string()).with_cause(err)
        }
        Failure::Status { status, body } => {
            let kind = classify_status(status);
            let details = parse_error_details(body);
            let message = match details.first() {
                Some(first) => format!("HTTP {}: {}", status, first),
                None => format!("HTTP {}", status),
            };
            ClassifiedError::new(kind, message)
                .with_status(status)
                .with_details(details)
        }
        Failure::Auth(err) => {
            ClassifiedError::new(ErrorKind::Authentication, err.to_string()).with_cause(err)
        }
        Failure::Cancelled(reason) => ClassifiedError::cancelled(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        for status in [500, 502, 503, 504, 429] {
            assert_eq!(classify_status(status), ErrorKind::ServerTransient);
        }
        assert_eq!(classify_status(401), ErrorKind::Authentication);
        assert_eq!(classify_status(403), ErrorKind::Authentication);
        assert_eq!(classify_status(400), ErrorKind::Validation);
        assert_eq!(classify_status(422), ErrorKind::Validation);
        assert_eq!(classify_status(404), ErrorKind::NotFound);
        assert_eq!(classify_status(501), ErrorKind::Unknown);
        assert_eq!(classify_status(302), ErrorKind::Unknown);
        assert_eq!(classify_status(409), ErrorKind::Unknown);
    }

    #[test]
    fn test_retryability_follows_kind() {
        assert!(classify(Failure::Status { status: 503, body: b"" }).is_retryable());
        assert!(!classify(Failure::Status { status: 400, body: b"" }).is_retryable());
        let remote_501 = classify(Failure::Status { status: 501, body: b"" });
        assert_eq!(remote_501.kind(), ErrorKind::Unknown);
        assert!(!remote_501.is_retryable());
        assert!(
            classify(Failure::Transport(TransportError::Connect("refused".into()))).is_retryable()
        );
        assert!(!classify(Failure::Cancelled(CancelReason::DeadlineExceeded)).is_retryable());
        assert!(!ClassifiedError::circuit_open("http://x").is_retryable());
    }

    #[test]
    fn test_server_error_details_are_attached() {
        let body = br#"{"errors":[{"error_number":1007,"error":"Protocol authentication error","description":"Unable to authenticate"}],"warnings":[]}"#;
        let err = classify(Failure::Status { status: 401, body });
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.status_code(), Some(401));
        assert_eq!(err.details().len(), 1);
        assert_eq!(err.details()[0].error_number, Some(1007));
        assert_eq!(err.message(), "HTTP 401: Unable to authenticate (error 1007)");
    }

    #[test]
    fn test_non_json_body_has_no_details() {
        let err = classify(Failure::Status { status: 502, body: b"<html>bad gateway</html>" });
        assert!(err.details().is_empty());
        assert_eq!(err.message(), "HTTP 502");
    }

    #[test]
    fn test_transport_cause_is_kept() {
        use std::error::Error as _;
        let err = classify(Failure::Transport(TransportError::Timeout("30s".into())));
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_auth_failure_is_not_retryable() {
        let err = classify(Failure::Auth(AuthError("expired".into())));
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(!err.is_retryable());
    }
}
