// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Version negotiation.
//!
//! The negotiator asks a server which Slurm release it runs, resolves the
//! API revisions that release serves, and binds the newest one this crate
//! has an adapter for. Results are cached per endpoint in a
//! [`SessionRegistry`]; concurrent first calls against one endpoint share a
//! single negotiation.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::adapter::wire;
use crate::adapter::{CapabilityAdapter, Revision};
use crate::classify::{ClassifiedError, ErrorKind};
use crate::compat::CompatibilityMatrix;
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::resilience::Pipeline;
use crate::transport::HttpRequest;
use crate::version::{ApiVersion, ProductVersion};

/// Path of the OpenAPI document slurmrestd serves.
const DISCOVERY_PATH: &str = "openapi/v3";

/// The outcome of negotiating with one endpoint. Never mutated; a
/// renegotiation produces a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedSession {
    endpoint: String,
    api_version: ApiVersion,
    product_version: Option<ProductVersion>,
    negotiated_at: DateTime<Utc>,
}

impl NegotiatedSession {
    pub fn new(
        endpoint: impl Into<String>,
        api_version: ApiVersion,
        product_version: Option<ProductVersion>,
        negotiated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_version,
            product_version,
            negotiated_at,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    /// The release the server reported. `None` when an explicit version
    /// skipped discovery.
    pub fn product_version(&self) -> Option<ProductVersion> {
        self.product_version
    }

    pub fn negotiated_at(&self) -> DateTime<Utc> {
        self.negotiated_at
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Every API version with a compiled-in adapter, oldest first.
pub fn compiled_versions() -> Vec<ApiVersion> {
    Revision::ALL.into_iter().map(Revision::api_version).collect()
}

/// Pick the newest candidate that is also compiled in.
///
/// `compiled` must be sorted ascending. When nothing intersects, the error
/// names the compiled version nearest to the newest candidate.
pub fn select_version(
    product_version: &ProductVersion,
    candidates: &BTreeSet<ApiVersion>,
    compiled: &[ApiVersion],
) -> Result<ApiVersion> {
    if let Some(selected) = candidates.iter().rev().find(|v| compiled.contains(v)) {
        return Ok(*selected);
    }

    let requested = candidates
        .iter()
        .map(ApiVersion::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let nearest = candidates
        .iter()
        .next_back()
        .and_then(|max| compiled.iter().rev().find(|v| *v <= max))
        .or_else(|| compiled.first())
        .copied()
        .ok_or_else(|| Error::Config("no API versions are compiled in".to_string()))?;

    Err(Error::UnsupportedVersion {
        requested: format!("Slurm {} ({})", product_version, requested),
        nearest,
    })
}

/// Map an explicit version to its adapter, or fail naming the nearest one.
pub fn explicit_revision(version: ApiVersion) -> Result<Revision> {
    Revision::from_api_version(version).ok_or_else(|| Error::UnsupportedVersion {
        requested: version.to_string(),
        nearest: Revision::nearest(version),
    })
}

/// Read the Slurm release from an OpenAPI discovery document.
///
/// Looks at `info.x-slurm.release`, then `info.x-slurm.version`, then the
/// `Slurm-24.05.1&...` form of `info.version`.
pub(crate) fn reported_release(doc: &Value) -> Option<String> {
    let info = doc.get("info")?;

    if let Some(release) = info.pointer("/x-slurm/release").and_then(Value::as_str) {
        return Some(release.to_string());
    }

    if let Some(version) = info.pointer("/x-slurm/version") {
        let part = |key: &str| {
            version.get(key).and_then(|v| {
                v.as_u64()
                    .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            })
        };
        if let (Some(major), Some(minor), Some(micro)) = (part("major"), part("minor"), part("micro")) {
            return Some(format!("{}.{}.{}", major, minor, micro));
        }
    }

    info.get("version")
        .and_then(Value::as_str)
        .and_then(|v| v.split('&').next())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Negotiator
// ============================================================================

/// Builds a [`CapabilityAdapter`] for an endpoint.
#[derive(Debug, Clone)]
pub struct Negotiator {
    pipeline: Arc<Pipeline>,
    matrix: Option<Arc<CompatibilityMatrix>>,
    explicit: Option<ApiVersion>,
}

impl Negotiator {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            matrix: None,
            explicit: None,
        }
    }

    /// Resolve against `matrix` instead of the built-in one.
    pub fn with_matrix(mut self, matrix: Arc<CompatibilityMatrix>) -> Self {
        self.matrix = Some(matrix);
        self
    }

    /// Skip discovery and bind `version` directly.
    pub fn with_explicit_version(mut self, version: ApiVersion) -> Self {
        self.explicit = Some(version);
        self
    }

    pub fn matrix(&self) -> &CompatibilityMatrix {
        match self.matrix.as_deref() {
            Some(matrix) => matrix,
            None => CompatibilityMatrix::builtin(),
        }
    }

    /// Fetch the discovery document and parse the reported release.
    ///
    /// The call runs through the pipeline like any other, so it is retried
    /// and counted by the endpoint's breaker.
    #[instrument(skip(self, ctx))]
    pub async fn discover(&self, ctx: &CallContext, endpoint: &str) -> Result<ProductVersion> {
        let url = format!("{}/{}", endpoint.trim_end_matches('/'), DISCOVERY_PATH);
        let response = self
            .pipeline
            .execute(ctx, endpoint, HttpRequest::get(url))
            .await
            .map_err(|e| Error::api(endpoint, None, e))?;

        let doc: Value = wire::decode(&response.body, "discovery")
            .map_err(|e| Error::api(endpoint, None, e))?;
        let release = reported_release(&doc).ok_or_else(|| {
            Error::api(
                endpoint,
                None,
                ClassifiedError::new(
                    ErrorKind::Unknown,
                    "discovery document does not report a Slurm release",
                ),
            )
        })?;

        debug!(release = %release, "Server reported release");
        Ok(ProductVersion::parse(&release)?)
    }

    /// Negotiate with `endpoint` and build its adapter.
    #[instrument(skip(self, ctx))]
    pub async fn negotiate(
        &self,
        ctx: &CallContext,
        endpoint: &str,
    ) -> Result<Arc<CapabilityAdapter>> {
        let (revision, product_version) = match self.explicit {
            Some(version) => {
                debug!(api_version = %version, "Using explicit API version");
                (explicit_revision(version)?, None)
            }
            None => {
                let product_version = self.discover(ctx, endpoint).await?;
                let candidates = self.matrix().resolve(&product_version)?;
                let selected = select_version(&product_version, candidates, &compiled_versions())?;
                (explicit_revision(selected)?, Some(product_version))
            }
        };

        let session = NegotiatedSession::new(endpoint, revision.api_version(), product_version, Utc::now());
        info!(
            endpoint,
            api_version = %revision,
            product_version = ?product_version.map(|v| v.to_string()),
            "Negotiated Slurm REST API version"
        );

        Ok(Arc::new(CapabilityAdapter::new(
            revision,
            Arc::new(session),
            Arc::clone(&self.pipeline),
        )))
    }
}

// ============================================================================
// Session registry
// ============================================================================

/// Negotiated adapters keyed by endpoint.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<OnceCell<Arc<CapabilityAdapter>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached adapter for `endpoint`, negotiating on first use.
    ///
    /// Concurrent callers wait on the same negotiation. A failed negotiation
    /// is not cached.
    pub async fn get_or_negotiate(
        &self,
        ctx: &CallContext,
        endpoint: &str,
        negotiator: &Negotiator,
    ) -> Result<Arc<CapabilityAdapter>> {
        let cell = self
            .sessions
            .entry(endpoint.to_string())
            .or_default()
            .value()
            .clone();
        cell.get_or_try_init(|| negotiator.negotiate(ctx, endpoint))
            .await
            .cloned()
    }

    pub fn get(&self, endpoint: &str) -> Option<Arc<CapabilityAdapter>> {
        self.sessions
            .get(endpoint)
            .and_then(|cell| cell.get().cloned())
    }

    /// Negotiate again for the endpoint `stale` is bound to.
    ///
    /// The cached session is dropped only while it is still `stale`, so
    /// concurrent callers holding the same outdated adapter share a single
    /// negotiation and all receive its result.
    pub async fn renegotiate(
        &self,
        ctx: &CallContext,
        stale: &Arc<CapabilityAdapter>,
        negotiator: &Negotiator,
    ) -> Result<Arc<CapabilityAdapter>> {
        let endpoint = stale.endpoint();
        let cell = {
            let mut entry = self.sessions.entry(endpoint.to_string()).or_default();
            let holds_stale = entry
                .value()
                .get()
                .is_some_and(|current| Arc::ptr_eq(current, stale));
            if holds_stale {
                *entry.value_mut() = Arc::new(OnceCell::new());
            }
            entry.value().clone()
        };
        cell.get_or_try_init(|| negotiator.negotiate(ctx, endpoint))
            .await
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn v(patch: u32) -> ApiVersion {
        ApiVersion::new(0, 0, patch)
    }

    #[test]
    fn test_release_sources_in_order() {
        let doc = json!({"info": {"x-slurm": {"release": "25.05.1", "version": {"major": "24", "minor": "11", "micro": "0"}}}});
        assert_eq!(reported_release(&doc).as_deref(), Some("25.05.1"));

        let doc = json!({"info": {"x-slurm": {"version": {"major": "24", "micro": "3", "minor": "11"}}}});
        assert_eq!(reported_release(&doc).as_deref(), Some("24.11.3"));

        let doc = json!({"info": {"version": "Slurm-24.05.1&openapi/slurmctld&openapi/slurmdbd"}});
        assert_eq!(reported_release(&doc).as_deref(), Some("Slurm-24.05.1"));

        assert_eq!(reported_release(&json!({"openapi": "3.0.2"})), None);
    }

    #[test]
    fn test_select_highest_compiled_intersection() {
        let product = ProductVersion::new(23, 11, 0);
        let candidates: BTreeSet<_> = [v(41), v(42)].into();

        let all = compiled_versions();
        assert_eq!(select_version(&product, &candidates, &all).unwrap(), v(42));

        let without_42 = [v(40), v(41), v(43)];
        assert_eq!(select_version(&product, &candidates, &without_42).unwrap(), v(41));
    }

    #[test]
    fn test_no_intersection_names_nearest() {
        let product = ProductVersion::new(23, 2, 0);
        let candidates: BTreeSet<_> = [v(37), v(38)].into();
        let err = select_version(&product, &candidates, &compiled_versions()).unwrap_err();
        match err {
            Error::UnsupportedVersion { requested, nearest } => {
                assert_eq!(nearest, v(40));
                assert!(requested.contains("v0.0.38"), "{requested}");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let candidates: BTreeSet<_> = [v(50)].into();
        let err = select_version(&product, &candidates, &compiled_versions()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { nearest, .. } if nearest == v(44)));
        assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_explicit_version_must_be_compiled() {
        assert_eq!(explicit_revision(v(43)).unwrap(), Revision::V0_0_43);
        let err = explicit_revision(v(39)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { nearest, .. } if nearest == v(40)));
    }

    #[test]
    fn test_matrix_falls_back_to_builtin() {
        use crate::adapter::test_support::Recorder;
        use crate::auth::NoAuth;
        use crate::resilience::{BreakerConfig, BreakerRegistry, RetryPolicy};

        let pipeline = Arc::new(Pipeline::new(
            Arc::new(Recorder::default()),
            Arc::new(NoAuth),
            RetryPolicy::no_retry(),
            Arc::new(BreakerRegistry::new(BreakerConfig::default())),
        ));
        let negotiator = Negotiator::new(pipeline);
        assert!(std::ptr::eq(negotiator.matrix(), CompatibilityMatrix::builtin()));

        let custom = CompatibilityMatrix::builder()
            .exact(ProductVersion::new(23, 11, 0), [v(41)])
            .build()
            .unwrap();
        let negotiator = negotiator.with_matrix(Arc::new(custom));
        assert_eq!(negotiator.matrix().entries().len(), 1);
        assert_eq!(
            negotiator
                .matrix()
                .resolve(&ProductVersion::new(23, 11, 0))
                .unwrap()
                .iter()
                .copied()
                .collect::<Vec<_>>(),
            vec![v(41)]
        );
    }
}
