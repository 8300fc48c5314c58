// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster information and controller health.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument};

use super::revision::{Action, Operation, Resource};
use super::wire::non_empty;
use super::{CapabilityAdapter, Plugin};
use crate::context::CallContext;
use crate::error::Result;
use crate::transport::Method;
use crate::types::{ClusterInfo, ControllerPing};

const fn op(action: Action) -> Operation {
    Operation::new(Resource::Cluster, action)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PingResponse {
    pings: Vec<WirePing>,
    meta: WireMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WirePing {
    hostname: String,
    /// `UP` or `DOWN`; the only health signal before `responding` existed.
    pinged: Option<String>,
    responding: Option<bool>,
    mode: Option<String>,
    latency: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireMeta {
    slurm: WireSlurmMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireSlurmMeta {
    release: Option<String>,
    cluster: Option<String>,
}

impl From<WirePing> for ControllerPing {
    fn from(wire: WirePing) -> Self {
        let responding = wire.responding.unwrap_or_else(|| {
            wire.pinged
                .as_deref()
                .is_some_and(|p| p.eq_ignore_ascii_case("UP"))
        });
        Self {
            hostname: wire.hostname,
            responding,
            mode: non_empty(wire.mode),
            latency_us: wire.latency,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterManager {
    adapter: Arc<CapabilityAdapter>,
}

impl ClusterManager {
    pub(crate) fn new(adapter: Arc<CapabilityAdapter>) -> Self {
        Self { adapter }
    }

    async fn fetch(&self, ctx: &CallContext) -> Result<PingResponse> {
        let request = self.adapter.request(Method::Get, Plugin::Slurm, &["ping"])?;
        self.adapter.send_json(ctx, request, "ping").await
    }

    /// Ping every configured controller.
    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn ping(&self, ctx: &CallContext) -> Result<Vec<ControllerPing>> {
        self.adapter.ensure(op(Action::Ping))?;
        let controllers: Vec<ControllerPing> = self
            .fetch(ctx)
            .await?
            .pings
            .into_iter()
            .map(ControllerPing::from)
            .collect();
        debug!(
            controllers = controllers.len(),
            responding = controllers.iter().filter(|c| c.responding).count(),
            "Pinged controllers"
        );
        Ok(controllers)
    }

    /// Cluster name and release as reported in the ping metadata.
    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn get(&self, ctx: &CallContext) -> Result<ClusterInfo> {
        self.adapter.ensure(op(Action::Get))?;
        let response = self.fetch(ctx).await?;
        Ok(ClusterInfo {
            cluster_name: non_empty(response.meta.slurm.cluster),
            release: non_empty(response.meta.slurm.release),
            api_version: self.adapter.api_version(),
            controllers: response.pings.into_iter().map(ControllerPing::from).collect(),
        })
    }
}
