// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compiled-in API revisions and what each one can do.

use std::fmt;

use crate::version::ApiVersion;

/// Resource families exposed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Jobs,
    Nodes,
    Partitions,
    Accounts,
    Users,
    Qos,
    Reservations,
    Cluster,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jobs => "jobs",
            Self::Nodes => "nodes",
            Self::Partitions => "partitions",
            Self::Accounts => "accounts",
            Self::Users => "users",
            Self::Qos => "qos",
            Self::Reservations => "reservations",
            Self::Cluster => "cluster",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    List,
    Get,
    Create,
    Update,
    Delete,
    Watch,
    Ping,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Watch => "watch",
            Self::Ping => "ping",
        }
    }
}

/// One entry of the uniform operation set, e.g. `jobs.update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operation {
    pub resource: Resource,
    pub action: Action,
}

impl Operation {
    pub const fn new(resource: Resource, action: Action) -> Self {
        Self { resource, action }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource.as_str(), self.action.as_str())
    }
}

/// A REST API revision this crate has an adapter for.
///
/// Variants are ordered oldest first, so `>=` reads as "this revision or
/// newer".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Revision {
    V0_0_40,
    V0_0_41,
    V0_0_42,
    V0_0_43,
    V0_0_44,
}

impl Revision {
    /// Every compiled-in revision, oldest first.
    pub const ALL: [Revision; 5] = [
        Self::V0_0_40,
        Self::V0_0_41,
        Self::V0_0_42,
        Self::V0_0_43,
        Self::V0_0_44,
    ];

    pub const fn api_version(self) -> ApiVersion {
        match self {
            Self::V0_0_40 => ApiVersion::new(0, 0, 40),
            Self::V0_0_41 => ApiVersion::new(0, 0, 41),
            Self::V0_0_42 => ApiVersion::new(0, 0, 42),
            Self::V0_0_43 => ApiVersion::new(0, 0, 43),
            Self::V0_0_44 => ApiVersion::new(0, 0, 44),
        }
    }

    pub fn from_api_version(version: ApiVersion) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|revision| revision.api_version() == version)
    }

    /// The compiled-in version closest to `target`: the highest one not
    /// above it, else the lowest one.
    pub fn nearest(target: ApiVersion) -> ApiVersion {
        Self::ALL
            .into_iter()
            .rev()
            .map(Self::api_version)
            .find(|v| *v <= target)
            .unwrap_or(Self::ALL[0].api_version())
    }

    /// Whether this revision's remote API offers `op`.
    pub fn supports(self, op: Operation) -> bool {
        use Action::*;
        use Resource::*;

        match (op.resource, op.action) {
            (Jobs, List | Get | Create | Delete) => true,
            (Jobs, Update) => self >= Self::V0_0_41,
            (Jobs | Nodes, Watch) => self >= Self::V0_0_42,

            (Nodes, List | Get | Update | Delete) => true,

            (Partitions, List | Get) => true,

            (Accounts | Users, List | Get | Create | Update | Delete) => true,

            (Qos, List | Get | Create | Update) => true,
            (Qos, Delete) => self >= Self::V0_0_43,

            (Reservations, List | Get) => true,
            (Reservations, Create | Update | Delete) => self >= Self::V0_0_43,

            (Cluster, Get | Ping) => true,

            _ => false,
        }
    }

    /// Name of the job switch-count field.
    pub fn switches_field(self) -> &'static str {
        match self {
            Self::V0_0_40 => "minimum_switches",
            _ => "required_switches",
        }
    }

    /// Whether job descriptions still carry `exclusive`/`oversubscribe`.
    pub fn accepts_exclusive(self) -> bool {
        self <= Self::V0_0_41
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.api_version().fmt(f)
    }
}
