// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Accounting associations: accounts.
//!
//! slurmdbd writes are upserts, so create and update post the same document
//! and differ only in logging and in the capability they require.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, instrument};

use super::revision::{Action, Operation, Resource};
use super::watch::{WatchEvent, WatchOptions, spawn_poller};
use super::{CapabilityAdapter, Plugin, single};
use crate::context::CallContext;
use crate::error::Result;
use crate::transport::Method;
use crate::types::{Account, ListOptions, Page};

const fn op(action: Action) -> Operation {
    Operation::new(Resource::Accounts, action)
}

#[derive(Debug, Default, Deserialize)]
struct AccountsResponse {
    #[serde(default)]
    accounts: Vec<WireAccount>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireAccount {
    name: String,
    description: String,
    organization: String,
    coordinators: Vec<WireCoordinator>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireCoordinator {
    name: String,
}

#[derive(Debug, Serialize)]
struct AccountDoc<'a> {
    name: &'a str,
    description: &'a str,
    organization: &'a str,
}

impl From<WireAccount> for Account {
    fn from(wire: WireAccount) -> Self {
        Self {
            name: wire.name,
            description: wire.description,
            organization: wire.organization,
            coordinators: wire.coordinators.into_iter().map(|c| c.name).collect(),
        }
    }
}

fn to_accounts(response: AccountsResponse) -> Vec<Account> {
    response
        .accounts
        .into_iter()
        .filter(|a| !a.name.is_empty())
        .map(Account::from)
        .collect()
}

#[derive(Debug, Clone)]
pub struct AccountManager {
    adapter: Arc<CapabilityAdapter>,
}

impl AccountManager {
    pub(crate) fn new(adapter: Arc<CapabilityAdapter>) -> Self {
        Self { adapter }
    }

    async fn fetch_all(&self, ctx: &CallContext) -> Result<Vec<Account>> {
        let request = self.adapter.request(Method::Get, Plugin::Slurmdb, &["accounts"])?;
        let response: AccountsResponse = self.adapter.send_json(ctx, request, "accounts").await?;
        Ok(to_accounts(response))
    }

    async fn upsert(&self, ctx: &CallContext, account: &Account) -> Result<()> {
        account.validate().map_err(|e| self.adapter.fail(e))?;
        let doc = AccountDoc {
            name: &account.name,
            description: &account.description,
            organization: &account.organization,
        };
        let request = self
            .adapter
            .request(Method::Post, Plugin::Slurmdb, &["accounts"])?
            .with_json(&json!({ "accounts": [doc] }));
        self.adapter.send(ctx, request).await?;
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn list(&self, ctx: &CallContext, options: &ListOptions) -> Result<Page<Account>> {
        self.adapter.ensure(op(Action::List))?;
        Ok(Page::slice(self.fetch_all(ctx).await?, options))
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn get(&self, ctx: &CallContext, name: &str) -> Result<Account> {
        self.adapter.ensure(op(Action::Get))?;
        let request = self
            .adapter
            .request(Method::Get, Plugin::Slurmdb, &["account", name])?;
        let response: AccountsResponse = self.adapter.send_json(ctx, request, "account").await?;
        single(&self.adapter, to_accounts(response), "account", name)
    }

    #[instrument(skip(self, ctx, account), fields(account = %account.name, api_version = %self.adapter.api_version()))]
    pub async fn create(&self, ctx: &CallContext, account: &Account) -> Result<()> {
        self.adapter.ensure(op(Action::Create))?;
        self.upsert(ctx, account).await?;
        info!("Created account");
        Ok(())
    }

    #[instrument(skip(self, ctx, account), fields(account = %account.name, api_version = %self.adapter.api_version()))]
    pub async fn update(&self, ctx: &CallContext, account: &Account) -> Result<()> {
        self.adapter.ensure(op(Action::Update))?;
        self.upsert(ctx, account).await?;
        info!("Updated account");
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn delete(&self, ctx: &CallContext, name: &str) -> Result<()> {
        self.adapter.ensure(op(Action::Delete))?;
        let request = self
            .adapter
            .request(Method::Delete, Plugin::Slurmdb, &["account", name])?;
        self.adapter.send(ctx, request).await?;
        info!(account = name, "Deleted account");
        Ok(())
    }

    pub async fn watch(
        &self,
        ctx: &CallContext,
        options: WatchOptions,
    ) -> Result<mpsc::Receiver<WatchEvent<Account>>> {
        self.adapter.ensure(op(Action::Watch))?;
        let manager = self.clone();
        Ok(spawn_poller(
            ctx.child(),
            options,
            move |ctx| {
                let manager = manager.clone();
                async move { manager.fetch_all(&ctx).await }
            },
            |a: &Account| a.name.clone(),
            |a: &Account| a.description.clone(),
        ))
    }
}
