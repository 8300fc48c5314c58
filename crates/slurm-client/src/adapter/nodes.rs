// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node operations.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use super::revision::{Action, Operation, Resource};
use super::watch::{WatchEvent, WatchOptions, spawn_poller};
use super::wire::{NoVal, non_empty, noval_u32, noval_u64, string_or_list};
use super::{CapabilityAdapter, Plugin, single};
use crate::classify::ClassifiedError;
use crate::context::CallContext;
use crate::error::Result;
use crate::transport::Method;
use crate::types::{ListOptions, Node, NodeUpdate, Page};

const fn op(action: Action) -> Operation {
    Operation::new(Resource::Nodes, action)
}

#[derive(Debug, Default, Deserialize)]
struct NodesResponse {
    #[serde(default)]
    nodes: Vec<WireNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireNode {
    name: String,
    #[serde(deserialize_with = "string_or_list")]
    state: Vec<String>,
    cpus: Option<NoVal>,
    real_memory: Option<NoVal>,
    #[serde(deserialize_with = "string_or_list")]
    partitions: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    features: Vec<String>,
    reason: Option<String>,
    architecture: Option<String>,
}

impl From<WireNode> for Node {
    fn from(wire: WireNode) -> Self {
        Self {
            name: wire.name,
            state: wire.state,
            cpus: noval_u32(wire.cpus),
            real_memory_mb: noval_u64(wire.real_memory),
            partitions: wire.partitions,
            features: wire.features,
            reason: non_empty(wire.reason),
            architecture: non_empty(wire.architecture),
        }
    }
}

fn to_nodes(response: NodesResponse) -> Vec<Node> {
    response
        .nodes
        .into_iter()
        .filter(|n| !n.name.is_empty())
        .map(Node::from)
        .collect()
}

pub(crate) fn update_body(update: &NodeUpdate) -> std::result::Result<Value, ClassifiedError> {
    update.validate()?;

    let mut body = Map::new();
    if let Some(state) = &update.state {
        body.insert("state".into(), json!([state.to_ascii_uppercase()]));
    }
    if let Some(reason) = &update.reason {
        body.insert("reason".into(), Value::String(reason.clone()));
    }
    if let Some(features) = &update.features {
        body.insert("features".into(), json!(features));
    }
    if let Some(comment) = &update.comment {
        body.insert("comment".into(), Value::String(comment.clone()));
    }
    Ok(Value::Object(body))
}

#[derive(Debug, Clone)]
pub struct NodeManager {
    adapter: Arc<CapabilityAdapter>,
}

impl NodeManager {
    pub(crate) fn new(adapter: Arc<CapabilityAdapter>) -> Self {
        Self { adapter }
    }

    async fn fetch_all(&self, ctx: &CallContext) -> Result<Vec<Node>> {
        let request = self.adapter.request(Method::Get, Plugin::Slurm, &["nodes"])?;
        let response: NodesResponse = self.adapter.send_json(ctx, request, "nodes").await?;
        Ok(to_nodes(response))
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn list(&self, ctx: &CallContext, options: &ListOptions) -> Result<Page<Node>> {
        self.adapter.ensure(op(Action::List))?;
        Ok(Page::slice(self.fetch_all(ctx).await?, options))
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn get(&self, ctx: &CallContext, name: &str) -> Result<Node> {
        self.adapter.ensure(op(Action::Get))?;
        let request = self.adapter.request(Method::Get, Plugin::Slurm, &["node", name])?;
        let response: NodesResponse = self.adapter.send_json(ctx, request, "node").await?;
        single(&self.adapter, to_nodes(response), "node", name)
    }

    /// Nodes come from slurm.conf or dynamic registration; no revision
    /// creates them over REST.
    pub async fn create(&self, _ctx: &CallContext, _node: &Node) -> Result<()> {
        self.adapter.ensure(op(Action::Create))
    }

    #[instrument(skip(self, ctx, update), fields(api_version = %self.adapter.api_version()))]
    pub async fn update(&self, ctx: &CallContext, name: &str, update: &NodeUpdate) -> Result<()> {
        self.adapter.ensure(op(Action::Update))?;
        let body = update_body(update).map_err(|e| self.adapter.fail(e))?;
        let request = self
            .adapter
            .request(Method::Post, Plugin::Slurm, &["node", name])?
            .with_json(&body);
        self.adapter.send(ctx, request).await?;
        info!(node = name, state = ?update.state, "Updated node");
        Ok(())
    }

    /// Remove a dynamic node.
    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn delete(&self, ctx: &CallContext, name: &str) -> Result<()> {
        self.adapter.ensure(op(Action::Delete))?;
        let request = self.adapter.request(Method::Delete, Plugin::Slurm, &["node", name])?;
        self.adapter.send(ctx, request).await?;
        info!(node = name, "Deleted node");
        Ok(())
    }

    /// Stream node state changes. The state key is the joined flag list, so
    /// `IDLE` to `IDLE+DRAIN` is a change.
    #[instrument(skip(self, ctx, options), fields(api_version = %self.adapter.api_version()))]
    pub async fn watch(
        &self,
        ctx: &CallContext,
        options: WatchOptions,
    ) -> Result<mpsc::Receiver<WatchEvent<Node>>> {
        self.adapter.ensure(op(Action::Watch))?;
        let manager = self.clone();

        Ok(spawn_poller(
            ctx.child(),
            options,
            move |ctx| {
                let manager = manager.clone();
                async move { manager.fetch_all(&ctx).await }
            },
            |node: &Node| node.name.clone(),
            Node::state_label,
        ))
    }
}
