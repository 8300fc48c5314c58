// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Partition operations. Partitions are read-only over REST.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::instrument;

use super::revision::{Action, Operation, Resource};
use super::watch::{WatchEvent, WatchOptions, spawn_poller};
use super::wire::{NoVal, non_empty, noval_u32, string_or_list};
use super::{CapabilityAdapter, Plugin, single};
use crate::context::CallContext;
use crate::error::Result;
use crate::transport::Method;
use crate::types::{ListOptions, Page, Partition};

const fn op(action: Action) -> Operation {
    Operation::new(Resource::Partitions, action)
}

#[derive(Debug, Default, Deserialize)]
struct PartitionsResponse {
    #[serde(default)]
    partitions: Vec<WirePartition>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WirePartition {
    name: String,
    partition: WirePartitionState,
    nodes: WirePartitionNodes,
    cpus: WirePartitionCpus,
    maximums: WireMaximums,
    #[serde(deserialize_with = "string_or_list")]
    flags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WirePartitionState {
    #[serde(deserialize_with = "string_or_list")]
    state: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WirePartitionNodes {
    configured: Option<String>,
    total: Option<NoVal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WirePartitionCpus {
    total: Option<NoVal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireMaximums {
    time: Option<NoVal>,
}

impl From<WirePartition> for Partition {
    fn from(wire: WirePartition) -> Self {
        Self {
            is_default: wire.flags.iter().any(|f| f.eq_ignore_ascii_case("DEFAULT")),
            name: wire.name,
            state: wire.partition.state,
            nodes: non_empty(wire.nodes.configured),
            total_nodes: noval_u32(wire.nodes.total),
            total_cpus: noval_u32(wire.cpus.total),
            max_time_minutes: noval_u32(wire.maximums.time),
        }
    }
}

fn to_partitions(response: PartitionsResponse) -> Vec<Partition> {
    response
        .partitions
        .into_iter()
        .filter(|p| !p.name.is_empty())
        .map(Partition::from)
        .collect()
}

#[derive(Debug, Clone)]
pub struct PartitionManager {
    adapter: Arc<CapabilityAdapter>,
}

impl PartitionManager {
    pub(crate) fn new(adapter: Arc<CapabilityAdapter>) -> Self {
        Self { adapter }
    }

    async fn fetch_all(&self, ctx: &CallContext) -> Result<Vec<Partition>> {
        let request = self.adapter.request(Method::Get, Plugin::Slurm, &["partitions"])?;
        let response: PartitionsResponse = self.adapter.send_json(ctx, request, "partitions").await?;
        Ok(to_partitions(response))
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn list(&self, ctx: &CallContext, options: &ListOptions) -> Result<Page<Partition>> {
        self.adapter.ensure(op(Action::List))?;
        Ok(Page::slice(self.fetch_all(ctx).await?, options))
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn get(&self, ctx: &CallContext, name: &str) -> Result<Partition> {
        self.adapter.ensure(op(Action::Get))?;
        let request = self
            .adapter
            .request(Method::Get, Plugin::Slurm, &["partition", name])?;
        let response: PartitionsResponse = self.adapter.send_json(ctx, request, "partition").await?;
        single(&self.adapter, to_partitions(response), "partition", name)
    }

    // Partitions are defined in slurm.conf. The write operations exist so the
    // surface is uniform; every revision answers NotImplemented.

    pub async fn create(&self, _ctx: &CallContext, _partition: &Partition) -> Result<()> {
        self.adapter.ensure(op(Action::Create))
    }

    pub async fn update(&self, _ctx: &CallContext, _name: &str, _partition: &Partition) -> Result<()> {
        self.adapter.ensure(op(Action::Update))
    }

    pub async fn delete(&self, _ctx: &CallContext, _name: &str) -> Result<()> {
        self.adapter.ensure(op(Action::Delete))
    }

    pub async fn watch(
        &self,
        ctx: &CallContext,
        options: WatchOptions,
    ) -> Result<mpsc::Receiver<WatchEvent<Partition>>> {
        self.adapter.ensure(op(Action::Watch))?;
        let manager = self.clone();
        Ok(spawn_poller(
            ctx.child(),
            options,
            move |ctx| {
                let manager = manager.clone();
                async move { manager.fetch_all(&ctx).await }
            },
            |p: &Partition| p.name.clone(),
            |p: &Partition| p.state.join("+"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::adapter::Revision;
    use crate::adapter::test_support::adapter;
    use crate::classify::ErrorKind;

    #[tokio::test]
    async fn test_get_decodes_nested_fields() {
        let (adapter, recorder) = adapter(Revision::V0_0_41);
        recorder.reply(
            200,
            json!({"partitions": [{
                "name": "batch",
                "partition": {"state": ["UP"]},
                "nodes": {"configured": "n[1-4]", "total": 4},
                "cpus": {"total": 256},
                "maximums": {"time": {"set": true, "infinite": false, "number": 1440}},
                "flags": ["DEFAULT"]
            }]}),
        );

        let partition = PartitionManager::new(adapter)
            .get(&CallContext::new(), "batch")
            .await
            .unwrap();
        assert_eq!(partition.state, ["UP"]);
        assert_eq!(partition.nodes.as_deref(), Some("n[1-4]"));
        assert_eq!(partition.total_nodes, Some(4));
        assert_eq!(partition.total_cpus, Some(256));
        assert_eq!(partition.max_time_minutes, Some(1440));
        assert!(partition.is_default);
        assert!(recorder.last().url.ends_with("/slurm/v0.0.41/partition/batch"));
    }

    #[tokio::test]
    async fn test_unlimited_time_is_none() {
        let (adapter, recorder) = adapter(Revision::V0_0_44);
        recorder.reply(
            200,
            json!({"partitions": [{"name": "debug", "maximums": {"time": {"set": true, "infinite": true, "number": 0}}}]}),
        );
        let page = PartitionManager::new(adapter)
            .list(&CallContext::new(), &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(page.items[0].max_time_minutes, None);
        assert!(!page.items[0].is_default);
    }

    #[tokio::test]
    async fn test_writes_are_not_implemented() {
        let (adapter, recorder) = adapter(Revision::V0_0_44);
        let partitions = PartitionManager::new(adapter);
        let ctx = CallContext::new();

        let err = partitions.delete(&ctx, "batch").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
        let err = partitions.watch(&ctx, WatchOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
        assert_eq!(recorder.count(), 0);
    }
}
