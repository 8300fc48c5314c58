// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Advance reservations. Writes need v0.0.43 or newer.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use super::revision::{Action, Operation, Resource};
use super::watch::{WatchEvent, WatchOptions, spawn_poller};
use super::wire::{NoVal, non_empty, noval_time, noval_u32, string_or_list, time_noval};
use super::{CapabilityAdapter, Plugin, single};
use crate::context::CallContext;
use crate::error::Result;
use crate::transport::Method;
use crate::types::{ListOptions, Page, Reservation};

const fn op(action: Action) -> Operation {
    Operation::new(Resource::Reservations, action)
}

#[derive(Debug, Default, Deserialize)]
struct ReservationsResponse {
    #[serde(default)]
    reservations: Vec<WireReservation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireReservation {
    name: String,
    node_list: Option<String>,
    node_count: Option<NoVal>,
    start_time: Option<NoVal>,
    end_time: Option<NoVal>,
    #[serde(deserialize_with = "string_or_list")]
    users: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    accounts: Vec<String>,
    partition: Option<String>,
    #[serde(deserialize_with = "string_or_list")]
    flags: Vec<String>,
}

impl From<WireReservation> for Reservation {
    fn from(wire: WireReservation) -> Self {
        Self {
            name: wire.name,
            node_list: non_empty(wire.node_list),
            node_count: noval_u32(wire.node_count),
            start_time: noval_time(wire.start_time),
            end_time: noval_time(wire.end_time),
            users: wire.users,
            accounts: wire.accounts,
            partition: non_empty(wire.partition),
            flags: wire.flags,
        }
    }
}

fn to_reservations(response: ReservationsResponse) -> Vec<Reservation> {
    response
        .reservations
        .into_iter()
        .filter(|r| !r.name.is_empty())
        .map(Reservation::from)
        .collect()
}

fn reservation_desc(reservation: &Reservation) -> Value {
    let mut desc = Map::new();
    desc.insert("name".into(), Value::String(reservation.name.clone()));
    if let Some(start) = reservation.start_time {
        desc.insert("start_time".into(), json!(time_noval(start)));
    }
    if let Some(end) = reservation.end_time {
        desc.insert("end_time".into(), json!(time_noval(end)));
    }
    if let Some(nodes) = &reservation.node_list {
        desc.insert("node_list".into(), Value::String(nodes.clone()));
    }
    if let Some(count) = reservation.node_count {
        desc.insert("node_count".into(), json!(NoVal::number(i64::from(count))));
    }
    if let Some(partition) = &reservation.partition {
        desc.insert("partition".into(), Value::String(partition.clone()));
    }
    if !reservation.users.is_empty() {
        desc.insert("users".into(), json!(reservation.users));
    }
    if !reservation.accounts.is_empty() {
        desc.insert("accounts".into(), json!(reservation.accounts));
    }
    if !reservation.flags.is_empty() {
        desc.insert("flags".into(), json!(reservation.flags));
    }
    Value::Object(desc)
}

#[derive(Debug, Clone)]
pub struct ReservationManager {
    adapter: Arc<CapabilityAdapter>,
}

impl ReservationManager {
    pub(crate) fn new(adapter: Arc<CapabilityAdapter>) -> Self {
        Self { adapter }
    }

    async fn fetch_all(&self, ctx: &CallContext) -> Result<Vec<Reservation>> {
        let request = self
            .adapter
            .request(Method::Get, Plugin::Slurm, &["reservations"])?;
        let response: ReservationsResponse =
            self.adapter.send_json(ctx, request, "reservations").await?;
        Ok(to_reservations(response))
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn list(&self, ctx: &CallContext, options: &ListOptions) -> Result<Page<Reservation>> {
        self.adapter.ensure(op(Action::List))?;
        Ok(Page::slice(self.fetch_all(ctx).await?, options))
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn get(&self, ctx: &CallContext, name: &str) -> Result<Reservation> {
        self.adapter.ensure(op(Action::Get))?;
        let request = self
            .adapter
            .request(Method::Get, Plugin::Slurm, &["reservation", name])?;
        let response: ReservationsResponse =
            self.adapter.send_json(ctx, request, "reservation").await?;
        single(&self.adapter, to_reservations(response), "reservation", name)
    }

    #[instrument(skip(self, ctx, reservation), fields(reservation = %reservation.name, api_version = %self.adapter.api_version()))]
    pub async fn create(&self, ctx: &CallContext, reservation: &Reservation) -> Result<()> {
        self.adapter.ensure(op(Action::Create))?;
        reservation.validate().map_err(|e| self.adapter.fail(e))?;
        let request = self
            .adapter
            .request(Method::Post, Plugin::Slurm, &["reservation"])?
            .with_json(&reservation_desc(reservation));
        self.adapter.send(ctx, request).await?;
        info!("Created reservation");
        Ok(())
    }

    #[instrument(skip(self, ctx, reservation), fields(reservation = %reservation.name, api_version = %self.adapter.api_version()))]
    pub async fn update(&self, ctx: &CallContext, reservation: &Reservation) -> Result<()> {
        self.adapter.ensure(op(Action::Update))?;
        reservation.validate().map_err(|e| self.adapter.fail(e))?;
        let request = self
            .adapter
            .request(Method::Post, Plugin::Slurm, &["reservations"])?
            .with_json(&json!({ "reservations": [reservation_desc(reservation)] }));
        self.adapter.send(ctx, request).await?;
        info!("Updated reservation");
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn delete(&self, ctx: &CallContext, name: &str) -> Result<()> {
        self.adapter.ensure(op(Action::Delete))?;
        let request = self
            .adapter
            .request(Method::Delete, Plugin::Slurm, &["reservation", name])?;
        self.adapter.send(ctx, request).await?;
        info!(reservation = name, "Deleted reservation");
        Ok(())
    }

    pub async fn watch(
        &self,
        ctx: &CallContext,
        options: WatchOptions,
    ) -> Result<mpsc::Receiver<WatchEvent<Reservation>>> {
        self.adapter.ensure(op(Action::Watch))?;
        let manager = self.clone();
        Ok(spawn_poller(
            ctx.child(),
            options,
            move |ctx| {
                let manager = manager.clone();
                async move { manager.fetch_all(&ctx).await }
            },
            |r: &Reservation| r.name.clone(),
            |r: &Reservation| r.flags.join(","),
        ))
    }
}
