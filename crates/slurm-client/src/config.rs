// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client configuration.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::compat::CompatibilityMatrix;
use crate::error::{Error, Result};
use crate::resilience::{BreakerConfig, RetryPolicy};
use crate::version::ApiVersion;

pub const DEFAULT_BASE_URL: &str = "http://localhost:6820";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for [`SlurmClient`](crate::SlurmClient).
#[derive(Clone)]
pub struct ClientConfig {
    /// slurmrestd base URL (default: `http://localhost:6820`)
    pub base_url: String,
    /// Skip discovery and use this API revision
    pub api_version: Option<ApiVersion>,
    /// Per-request transport timeout (default: 30s)
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    /// Sent as `X-SLURM-USER-NAME`
    pub user_name: Option<String>,
    /// Sent as `X-SLURM-USER-TOKEN`
    pub jwt: Option<String>,
    /// Replaces the built-in matrix during negotiation
    pub compatibility_matrix: Option<Arc<CompatibilityMatrix>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: None,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            user_name: None,
            jwt: None,
            compatibility_matrix: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .field("user_name", &self.user_name)
            .field("jwt", &self.jwt.as_ref().map(|_| "<redacted>"))
            .field("custom_matrix", &self.compatibility_matrix.is_some())
            .finish()
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>>
where
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {}: {}", name, e))),
        _ => Ok(None),
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `SLURM_REST_URL` - Base URL (default: `http://localhost:6820`)
    /// - `SLURM_API_VERSION` - Explicit API revision, e.g. `v0.0.42`
    /// - `SLURM_TIMEOUT_MS` - Request timeout (default: 30000)
    /// - `SLURM_MAX_ATTEMPTS` - Attempts per call (default: 3)
    /// - `SLURM_RETRY_BASE_DELAY_MS` - First backoff delay (default: 100)
    /// - `SLURM_RETRY_MAX_DELAY_MS` - Backoff cap (default: 5000)
    /// - `SLURM_BREAKER_FAILURE_THRESHOLD` - Failures before opening (default: 5)
    /// - `SLURM_BREAKER_OPEN_TIMEOUT_MS` - Open period (default: 30000)
    /// - `SLURM_USER_NAME` - User name header
    /// - `SLURM_JWT` - JWT header
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("SLURM_REST_URL").filter(|u| !u.trim().is_empty()) {
            config.base_url = url.trim().to_string();
        }
        config.api_version = parse_var::<ApiVersion>(&lookup, "SLURM_API_VERSION")?;
        if let Some(ms) = parse_var::<u64>(&lookup, "SLURM_TIMEOUT_MS")? {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32>(&lookup, "SLURM_MAX_ATTEMPTS")? {
            config.retry.max_attempts = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "SLURM_RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "SLURM_RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32>(&lookup, "SLURM_BREAKER_FAILURE_THRESHOLD")? {
            config.breaker.failure_threshold = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "SLURM_BREAKER_OPEN_TIMEOUT_MS")? {
            config.breaker.open_timeout = Duration::from_millis(ms);
        }
        config.user_name = lookup("SLURM_USER_NAME").filter(|v| !v.is_empty());
        config.jwt = lookup("SLURM_JWT").filter(|v| !v.is_empty());

        config.validate()?;
        Ok(config)
    }

    pub fn with_api_version(mut self, version: ApiVersion) -> Self {
        self.api_version = Some(version);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_token(mut self, user_name: impl Into<String>, jwt: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self.jwt = Some(jwt.into());
        self
    }

    pub fn with_compatibility_matrix(mut self, matrix: CompatibilityMatrix) -> Self {
        self.compatibility_matrix = Some(Arc::new(matrix));
        self
    }

    /// Base URL without a trailing slash. Also the endpoint identity used
    /// for session and breaker registries.
    pub fn endpoint(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(self.endpoint())
            .map_err(|e| Error::Config(format!("invalid base URL '{}': {}", self.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "base URL must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be positive".into()));
        }
        self.retry.validate()?;
        self.breaker.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:6820");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.open_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_reads_everything() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("SLURM_REST_URL", "https://slurm.example.org:6820/"),
            ("SLURM_API_VERSION", "v0.0.41"),
            ("SLURM_TIMEOUT_MS", "5000"),
            ("SLURM_MAX_ATTEMPTS", "5"),
            ("SLURM_RETRY_BASE_DELAY_MS", "50"),
            ("SLURM_RETRY_MAX_DELAY_MS", "2000"),
            ("SLURM_BREAKER_FAILURE_THRESHOLD", "2"),
            ("SLURM_BREAKER_OPEN_TIMEOUT_MS", "10000"),
            ("SLURM_USER_NAME", "alice"),
            ("SLURM_JWT", "jwt"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint(), "https://slurm.example.org:6820");
        assert_eq!(config.api_version, Some(ApiVersion::new(0, 0, 41)));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(50));
        assert_eq!(config.retry.max_delay, Duration::from_secs(2));
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.open_timeout, Duration::from_secs(10));
        assert_eq!(config.user_name.as_deref(), Some("alice"));
        assert_eq!(config.jwt.as_deref(), Some("jwt"));
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.api_version.is_none());
        assert!(config.jwt.is_none());
    }

    #[test]
    fn test_from_lookup_rejects_malformed_values() {
        let err = ClientConfig::from_lookup(lookup(&[("SLURM_MAX_ATTEMPTS", "three")])).unwrap_err();
        assert!(err.to_string().contains("SLURM_MAX_ATTEMPTS"));

        assert!(ClientConfig::from_lookup(lookup(&[("SLURM_API_VERSION", "latest")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("SLURM_MAX_ATTEMPTS", "0")])).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        assert!(ClientConfig::new("not a url").validate().is_err());
        assert!(ClientConfig::new("ftp://slurm").validate().is_err());
    }

    #[test]
    fn test_debug_redacts_jwt() {
        let config = ClientConfig::default().with_token("alice", "super-secret");
        assert!(!format!("{:?}", config).contains("super-secret"));
    }
}
