// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Slurm REST client
//!
//! One stable interface over every slurmrestd API revision this crate knows.
//!
//! # Architecture
//!
//! - **Negotiation**: on connect the client reads the Slurm release from the
//!   server's OpenAPI document, resolves the API revisions that release
//!   serves through a [`CompatibilityMatrix`], and binds the newest one with
//!   a compiled-in adapter. An explicit version skips discovery.
//! - **Capability adapters**: every revision exposes the same resource
//!   managers. Operations a revision lacks fail with
//!   [`Error::NotImplemented`] before any network I/O.
//! - **Resilient pipeline**: every request runs through retries with
//!   jittered exponential backoff behind a per-endpoint circuit breaker.
//!   Failures are labelled with an [`ErrorKind`] that callers can branch on.
//!
//! # Example
//!
//! ```no_run
//! use slurm_client::{CallContext, ClientConfig, JobSubmission, SlurmClient};
//! use std::time::Duration;
//!
//! # async fn example() -> slurm_client::Result<()> {
//! let config = ClientConfig::new("http://slurmrestd:6820").with_token("alice", "eyJhbGciOi...");
//! let ctx = CallContext::new().with_timeout(Duration::from_secs(60));
//! let client = SlurmClient::connect(&ctx, config).await?;
//!
//! let job = JobSubmission::new("hello", "#!/bin/bash\nsrun hostname").with_time_limit(5);
//! let submitted = client.jobs().create(&ctx, &job).await?;
//! println!("submitted job {} via {}", submitted.job_id, client.version());
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod auth;
pub mod classify;
mod client;
pub mod compat;
pub mod config;
pub mod context;
pub mod error;
pub mod negotiate;
pub mod resilience;
pub mod transport;
pub mod types;
pub mod version;

pub use adapter::{
    AccountManager, Action, CapabilityAdapter, ClusterManager, JobManager, NodeManager,
    Operation, PartitionManager, QosManager, ReservationManager, Resource, Revision,
    UserManager, WatchEvent, WatchOptions,
};
pub use auth::{AuthProvider, NoAuth, TokenAuth};
pub use classify::{ClassifiedError, ErrorKind};
pub use client::SlurmClient;
pub use compat::{CompatibilityMatrix, NoMatchError, ProductVersionRange};
pub use config::ClientConfig;
pub use context::{CallContext, CancelReason};
pub use error::{Error, Result};
pub use negotiate::NegotiatedSession;
pub use resilience::{BreakerConfig, BreakerSnapshot, BreakerState, RetryPolicy};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport, TransportError};
pub use types::{
    Account, ClusterInfo, ControllerPing, Job, JobListOptions, JobState, JobSubmission,
    JobUpdate, ListOptions, Node, NodeUpdate, Page, Partition, Qos, Reservation, SubmitResult,
    User,
};
pub use version::{ApiVersion, ParseError, ProductVersion};
