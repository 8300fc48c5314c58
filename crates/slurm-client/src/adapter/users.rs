// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Accounting users.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use super::revision::{Action, Operation, Resource};
use super::watch::{WatchEvent, WatchOptions, spawn_poller};
use super::wire::{non_empty, string_or_list};
use super::{CapabilityAdapter, Plugin, single};
use crate::context::CallContext;
use crate::error::Result;
use crate::transport::Method;
use crate::types::{ListOptions, Page, User};

const fn op(action: Action) -> Operation {
    Operation::new(Resource::Users, action)
}

#[derive(Debug, Default, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    users: Vec<WireUser>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireUser {
    name: String,
    default: WireUserDefaults,
    #[serde(deserialize_with = "string_or_list")]
    administrator_level: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireUserDefaults {
    account: Option<String>,
    wckey: Option<String>,
}

impl From<WireUser> for User {
    fn from(wire: WireUser) -> Self {
        Self {
            name: wire.name,
            default_account: non_empty(wire.default.account),
            default_wckey: non_empty(wire.default.wckey),
            admin_level: wire.administrator_level.into_iter().next(),
        }
    }
}

fn to_users(response: UsersResponse) -> Vec<User> {
    response
        .users
        .into_iter()
        .filter(|u| !u.name.is_empty())
        .map(User::from)
        .collect()
}

fn user_doc(user: &User) -> Value {
    let mut defaults = Map::new();
    if let Some(account) = &user.default_account {
        defaults.insert("account".into(), Value::String(account.clone()));
    }
    if let Some(wckey) = &user.default_wckey {
        defaults.insert("wckey".into(), Value::String(wckey.clone()));
    }

    let mut doc = Map::new();
    doc.insert("name".into(), Value::String(user.name.clone()));
    if !defaults.is_empty() {
        doc.insert("default".into(), Value::Object(defaults));
    }
    if let Some(level) = &user.admin_level {
        doc.insert("administrator_level".into(), json!([level]));
    }
    json!({ "users": [doc] })
}

#[derive(Debug, Clone)]
pub struct UserManager {
    adapter: Arc<CapabilityAdapter>,
}

impl UserManager {
    pub(crate) fn new(adapter: Arc<CapabilityAdapter>) -> Self {
        Self { adapter }
    }

    async fn fetch_all(&self, ctx: &CallContext) -> Result<Vec<User>> {
        let request = self.adapter.request(Method::Get, Plugin::Slurmdb, &["users"])?;
        let response: UsersResponse = self.adapter.send_json(ctx, request, "users").await?;
        Ok(to_users(response))
    }

    async fn upsert(&self, ctx: &CallContext, user: &User) -> Result<()> {
        user.validate().map_err(|e| self.adapter.fail(e))?;
        let request = self
            .adapter
            .request(Method::Post, Plugin::Slurmdb, &["users"])?
            .with_json(&user_doc(user));
        self.adapter.send(ctx, request).await?;
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn list(&self, ctx: &CallContext, options: &ListOptions) -> Result<Page<User>> {
        self.adapter.ensure(op(Action::List))?;
        Ok(Page::slice(self.fetch_all(ctx).await?, options))
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn get(&self, ctx: &CallContext, name: &str) -> Result<User> {
        self.adapter.ensure(op(Action::Get))?;
        let request = self.adapter.request(Method::Get, Plugin::Slurmdb, &["user", name])?;
        let response: UsersResponse = self.adapter.send_json(ctx, request, "user").await?;
        single(&self.adapter, to_users(response), "user", name)
    }

    #[instrument(skip(self, ctx, user), fields(user = %user.name, api_version = %self.adapter.api_version()))]
    pub async fn create(&self, ctx: &CallContext, user: &User) -> Result<()> {
        self.adapter.ensure(op(Action::Create))?;
        self.upsert(ctx, user).await?;
        info!("Created user");
        Ok(())
    }

    #[instrument(skip(self, ctx, user), fields(user = %user.name, api_version = %self.adapter.api_version()))]
    pub async fn update(&self, ctx: &CallContext, user: &User) -> Result<()> {
        self.adapter.ensure(op(Action::Update))?;
        self.upsert(ctx, user).await?;
        info!("Updated user");
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn delete(&self, ctx: &CallContext, name: &str) -> Result<()> {
        self.adapter.ensure(op(Action::Delete))?;
        let request = self
            .adapter
            .request(Method::Delete, Plugin::Slurmdb, &["user", name])?;
        self.adapter.send(ctx, request).await?;
        info!(user = name, "Deleted user");
        Ok(())
    }

    pub async fn watch(
        &self,
        ctx: &CallContext,
        options: WatchOptions,
    ) -> Result<mpsc::Receiver<WatchEvent<User>>> {
        self.adapter.ensure(op(Action::Watch))?;
        let manager = self.clone();
        Ok(spawn_poller(
            ctx.child(),
            options,
            move |ctx| {
                let manager = manager.clone();
                async move { manager.fetch_all(&ctx).await }
            },
            |u: &User| u.name.clone(),
            |u: &User| u.default_account.clone().unwrap_or_default(),
        ))
    }
}
