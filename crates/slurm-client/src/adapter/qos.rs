// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Quality-of-service definitions.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use super::revision::{Action, Operation, Resource};
use super::watch::{WatchEvent, WatchOptions, spawn_poller};
use super::wire::{NoVal, non_empty, noval_u32, string_or_list};
use super::{CapabilityAdapter, Plugin, single};
use crate::context::CallContext;
use crate::error::Result;
use crate::transport::Method;
use crate::types::{ListOptions, Page, Qos};

const fn op(action: Action) -> Operation {
    Operation::new(Resource::Qos, action)
}

#[derive(Debug, Default, Deserialize)]
struct QosResponse {
    #[serde(default)]
    qos: Vec<WireQos>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireQos {
    name: String,
    description: Option<String>,
    priority: Option<NoVal>,
    limits: WireLimits,
    #[serde(deserialize_with = "string_or_list")]
    flags: Vec<String>,
}

// limits.max.wall_clock.per.job
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireLimits {
    max: WireMax,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireMax {
    wall_clock: WireWallClock,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireWallClock {
    per: WirePer,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WirePer {
    job: Option<NoVal>,
}

impl From<WireQos> for Qos {
    fn from(wire: WireQos) -> Self {
        Self {
            name: wire.name,
            description: non_empty(wire.description),
            priority: noval_u32(wire.priority),
            max_wall_minutes_per_job: noval_u32(wire.limits.max.wall_clock.per.job),
            flags: wire.flags,
        }
    }
}

fn to_qos(response: QosResponse) -> Vec<Qos> {
    response
        .qos
        .into_iter()
        .filter(|q| !q.name.is_empty())
        .map(Qos::from)
        .collect()
}

fn qos_doc(qos: &Qos) -> Value {
    let mut doc = Map::new();
    doc.insert("name".into(), Value::String(qos.name.clone()));
    if let Some(description) = &qos.description {
        doc.insert("description".into(), Value::String(description.clone()));
    }
    if let Some(priority) = qos.priority {
        doc.insert("priority".into(), json!(NoVal::number(i64::from(priority))));
    }
    if let Some(minutes) = qos.max_wall_minutes_per_job {
        doc.insert(
            "limits".into(),
            json!({"max": {"wall_clock": {"per": {"job": NoVal::number(i64::from(minutes))}}}}),
        );
    }
    if !qos.flags.is_empty() {
        doc.insert("flags".into(), json!(qos.flags));
    }
    json!({ "qos": [doc] })
}

#[derive(Debug, Clone)]
pub struct QosManager {
    adapter: Arc<CapabilityAdapter>,
}

impl QosManager {
    pub(crate) fn new(adapter: Arc<CapabilityAdapter>) -> Self {
        Self { adapter }
    }

    async fn fetch_all(&self, ctx: &CallContext) -> Result<Vec<Qos>> {
        let request = self.adapter.request(Method::Get, Plugin::Slurmdb, &["qos"])?;
        let response: QosResponse = self.adapter.send_json(ctx, request, "qos").await?;
        Ok(to_qos(response))
    }

    async fn upsert(&self, ctx: &CallContext, qos: &Qos) -> Result<()> {
        qos.validate().map_err(|e| self.adapter.fail(e))?;
        let request = self
            .adapter
            .request(Method::Post, Plugin::Slurmdb, &["qos"])?
            .with_json(&qos_doc(qos));
        self.adapter.send(ctx, request).await?;
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn list(&self, ctx: &CallContext, options: &ListOptions) -> Result<Page<Qos>> {
        self.adapter.ensure(op(Action::List))?;
        Ok(Page::slice(self.fetch_all(ctx).await?, options))
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn get(&self, ctx: &CallContext, name: &str) -> Result<Qos> {
        self.adapter.ensure(op(Action::Get))?;
        let request = self.adapter.request(Method::Get, Plugin::Slurmdb, &["qos", name])?;
        let response: QosResponse = self.adapter.send_json(ctx, request, "qos").await?;
        single(&self.adapter, to_qos(response), "qos", name)
    }

    #[instrument(skip(self, ctx, qos), fields(qos = %qos.name, api_version = %self.adapter.api_version()))]
    pub async fn create(&self, ctx: &CallContext, qos: &Qos) -> Result<()> {
        self.adapter.ensure(op(Action::Create))?;
        self.upsert(ctx, qos).await?;
        info!("Created QoS");
        Ok(())
    }

    #[instrument(skip(self, ctx, qos), fields(qos = %qos.name, api_version = %self.adapter.api_version()))]
    pub async fn update(&self, ctx: &CallContext, qos: &Qos) -> Result<()> {
        self.adapter.ensure(op(Action::Update))?;
        self.upsert(ctx, qos).await?;
        info!("Updated QoS");
        Ok(())
    }

    /// Available from v0.0.43.
    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn delete(&self, ctx: &CallContext, name: &str) -> Result<()> {
        self.adapter.ensure(op(Action::Delete))?;
        let request = self
            .adapter
            .request(Method::Delete, Plugin::Slurmdb, &["qos", name])?;
        self.adapter.send(ctx, request).await?;
        info!(qos = name, "Deleted QoS");
        Ok(())
    }

    pub async fn watch(
        &self,
        ctx: &CallContext,
        options: WatchOptions,
    ) -> Result<mpsc::Receiver<WatchEvent<Qos>>> {
        self.adapter.ensure(op(Action::Watch))?;
        let manager = self.clone();
        Ok(spawn_poller(
            ctx.child(),
            options,
            move |ctx| {
                let manager = manager.clone();
                async move { manager.fetch_all(&ctx).await }
            },
            |q: &Qos| q.name.clone(),
            |q: &Qos| q.flags.join(","),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Revision;
    use crate::adapter::test_support::adapter;
    use crate::classify::ErrorKind;

    #[tokio::test]
    async fn test_get_reads_nested_wall_limit() {
        let (adapter, recorder) = adapter(Revision::V0_0_42);
        recorder.reply(
            200,
            json!({"qos": [{
                "name": "high",
                "description": "",
                "priority": {"set": true, "infinite": false, "number": 1000},
                "limits": {"max": {"wall_clock": {"per": {"job": {"set": true, "infinite": false, "number": 720}}}}},
                "flags": ["DENY_LIMIT"]
            }]}),
        );
        let qos = QosManager::new(adapter)
            .get(&CallContext::new(), "high")
            .await
            .unwrap();
        assert_eq!(qos.description, None);
        assert_eq!(qos.priority, Some(1000));
        assert_eq!(qos.max_wall_minutes_per_job, Some(720));
        assert_eq!(qos.flags, ["DENY_LIMIT"]);
    }

    #[tokio::test]
    async fn test_create_document_shape() {
        let (adapter, recorder) = adapter(Revision::V0_0_42);
        let mut qos = Qos::new("low");
        qos.priority = Some(10);
        QosManager::new(adapter)
            .create(&CallContext::new(), &qos)
            .await
            .unwrap();
        assert_eq!(
            recorder.last_body(),
            json!({"qos": [{"name": "low", "priority": {"set": true, "infinite": false, "number": 10}}]})
        );
    }

    #[tokio::test]
    async fn test_delete_needs_v43() {
        let (old, old_recorder) = adapter(Revision::V0_0_42);
        let err = QosManager::new(old)
            .delete(&CallContext::new(), "low")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
        assert_eq!(old_recorder.count(), 0);

        let (new, new_recorder) = adapter(Revision::V0_0_43);
        QosManager::new(new)
            .delete(&CallContext::new(), "low")
            .await
            .unwrap();
        assert!(new_recorder.last().url.ends_with("/slurmdb/v0.0.43/qos/low"));
    }
}
