// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Capability adapters.
//!
//! A [`CapabilityAdapter`] binds one negotiated [`Revision`] to an endpoint
//! and exposes the uniform operation set through per-resource managers.
//! Every call site goes through the same managers whatever the revision;
//! the revision only decides request shapes, response decoding and which
//! operations answer `NotImplemented` before touching the network.

mod accounts;
mod cluster;
mod jobs;
mod nodes;
mod partitions;
mod qos;
mod reservations;
mod revision;
mod users;
mod watch;
pub(crate) mod wire;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

pub use accounts::AccountManager;
pub use cluster::ClusterManager;
pub use jobs::JobManager;
pub use nodes::NodeManager;
pub use partitions::PartitionManager;
pub use qos::QosManager;
pub use reservations::ReservationManager;
pub use revision::{Action, Operation, Resource, Revision};
pub use users::UserManager;
pub use watch::{WatchEvent, WatchOptions};

use crate::classify::{ClassifiedError, ErrorKind};
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::negotiate::NegotiatedSession;
use crate::resilience::Pipeline;
use crate::transport::{HttpRequest, HttpResponse, Method};
use crate::version::ApiVersion;

/// Which REST plugin an operation lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Plugin {
    /// `/slurm/{version}/...`, talking to slurmctld.
    Slurm,
    /// `/slurmdb/{version}/...`, talking to slurmdbd.
    Slurmdb,
}

impl Plugin {
    fn as_str(self) -> &'static str {
        match self {
            Self::Slurm => "slurm",
            Self::Slurmdb => "slurmdb",
        }
    }
}

/// The operation set bound to one negotiated revision.
#[derive(Debug)]
pub struct CapabilityAdapter {
    revision: Revision,
    session: Arc<NegotiatedSession>,
    pipeline: Arc<Pipeline>,
}

impl CapabilityAdapter {
    pub(crate) fn new(
        revision: Revision,
        session: Arc<NegotiatedSession>,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        Self {
            revision,
            session,
            pipeline,
        }
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn api_version(&self) -> ApiVersion {
        self.revision.api_version()
    }

    pub fn session(&self) -> &NegotiatedSession {
        &self.session
    }

    pub fn endpoint(&self) -> &str {
        self.session.endpoint()
    }

    pub fn supports(&self, op: Operation) -> bool {
        self.revision.supports(op)
    }

    /// Fail with `NotImplemented` if the revision lacks `op`.
    pub(crate) fn ensure(&self, op: Operation) -> Result<()> {
        if self.supports(op) {
            Ok(())
        } else {
            debug!(operation = %op, api_version = %self.api_version(), "Operation not implemented");
            Err(Error::NotImplemented {
                operation: op,
                api_version: self.api_version(),
            })
        }
    }

    /// Wrap a classified failure with this adapter's endpoint and version.
    pub(crate) fn fail(&self, source: ClassifiedError) -> Error {
        Error::api(self.endpoint(), Some(self.api_version()), source)
    }

    /// Build `{endpoint}/{plugin}/{version}/{segments...}`, percent-encoding
    /// each segment.
    pub(crate) fn url(&self, plugin: Plugin, segments: &[&str]) -> Result<String> {
        let mut url = url::Url::parse(self.endpoint())
            .map_err(|e| Error::Config(format!("invalid endpoint '{}': {}", self.endpoint(), e)))?;
        let version = self.api_version().to_string();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("endpoint '{}' cannot be a base", self.endpoint())))?
            .pop_if_empty()
            .push(plugin.as_str())
            .push(&version)
            .extend(segments);
        Ok(url.to_string())
    }

    pub(crate) fn request(
        &self,
        method: Method,
        plugin: Plugin,
        segments: &[&str],
    ) -> Result<HttpRequest> {
        Ok(HttpRequest::new(method, self.url(plugin, segments)?))
    }

    /// Run a request through the pipeline.
    pub(crate) async fn send(&self, ctx: &CallContext, request: HttpRequest) -> Result<HttpResponse> {
        self.pipeline
            .execute(ctx, self.endpoint(), request)
            .await
            .map_err(|e| self.fail(e))
    }

    /// Run a request and decode its 2xx body.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        request: HttpRequest,
        what: &str,
    ) -> Result<T> {
        let response = self.send(ctx, request).await?;
        wire::decode(&response.body, what).map_err(|e| self.fail(e))
    }
}

/// Look up one item by name in a list response, mapping absence to
/// `NotFound`.
pub(crate) fn single<T>(
    adapter: &CapabilityAdapter,
    items: Vec<T>,
    what: &str,
    key: &str,
) -> Result<T> {
    items.into_iter().next().ok_or_else(|| {
        adapter.fail(ClassifiedError::new(
            ErrorKind::NotFound,
            format!("{} '{}' not found", what, key),
        ))
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_url_building_encodes_segments() {
        let (adapter, _) = adapter(Revision::V0_0_42);
        assert_eq!(
            adapter.url(Plugin::Slurm, &["jobs"]).unwrap(),
            "http://slurm:6820/slurm/v0.0.42/jobs"
        );
        assert_eq!(
            adapter.url(Plugin::Slurmdb, &["account", "a b/c"]).unwrap(),
            "http://slurm:6820/slurmdb/v0.0.42/account/a%20b%2Fc"
        );
    }

    #[tokio::test]
    async fn test_ensure_reports_operation_and_version() {
        let (adapter, recorder) = adapter(Revision::V0_0_40);
        let err = adapter
            .ensure(Operation::new(Resource::Jobs, Action::Update))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotImplemented { api_version, .. } if api_version == ApiVersion::new(0, 0, 40)
        ));
        assert_eq!(recorder.count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_unknown() {
        let (adapter, recorder) = adapter(Revision::V0_0_42);
        recorder.reply(200, serde_json::json!({"jobs": "nope"}));
        let request = adapter.request(Method::Get, Plugin::Slurm, &["jobs"]).unwrap();
        let err = adapter
            .send_json::<jobs::JobsResponse>(&CallContext::new(), request, "jobs")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.api_version(), Some(ApiVersion::new(0, 0, 42)));
    }
}
