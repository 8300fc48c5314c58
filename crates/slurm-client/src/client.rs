// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The unified Slurm client.

use std::sync::{Arc, RwLock};

use tracing::{info, instrument};

use crate::adapter::{
    AccountManager, CapabilityAdapter, ClusterManager, JobManager, NodeManager, Operation,
    PartitionManager, QosManager, ReservationManager, UserManager,
};
use crate::auth::{AuthProvider, NoAuth, TokenAuth};
use crate::config::ClientConfig;
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::negotiate::{NegotiatedSession, Negotiator, SessionRegistry};
use crate::resilience::{BreakerRegistry, BreakerSnapshot, Pipeline};
use crate::transport::{ReqwestTransport, Transport};
use crate::version::ApiVersion;

/// Version-agnostic client for one slurmrestd endpoint.
///
/// Construction negotiates the API revision. Every resource manager handed
/// out afterwards is bound to that revision; operations the revision lacks
/// fail with [`Error::NotImplemented`] without touching the network.
///
/// # Example
///
/// ```no_run
/// use slurm_client::{CallContext, ClientConfig, JobListOptions, SlurmClient};
///
/// # async fn example() -> slurm_client::Result<()> {
/// let ctx = CallContext::new();
/// let client = SlurmClient::connect(&ctx, ClientConfig::from_env()?).await?;
/// println!("Negotiated {}", client.version());
///
/// let running = client.jobs().list(&ctx, &JobListOptions::default()).await?;
/// println!("{} jobs", running.total);
/// # Ok(())
/// # }
/// ```
pub struct SlurmClient {
    config: ClientConfig,
    pipeline: Arc<Pipeline>,
    negotiator: Negotiator,
    sessions: SessionRegistry,
    current: RwLock<Arc<CapabilityAdapter>>,
}

impl std::fmt::Debug for SlurmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlurmClient")
            .field("endpoint", &self.config.endpoint())
            .field("api_version", &self.version())
            .finish_non_exhaustive()
    }
}

impl SlurmClient {
    /// Connect over HTTP with the configured credentials.
    pub async fn connect(ctx: &CallContext, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(config.timeout)
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {}", e)))?;
        let auth: Arc<dyn AuthProvider> = match &config.jwt {
            Some(jwt) => Arc::new(TokenAuth::new(
                config.user_name.clone().unwrap_or_default(),
                jwt.clone(),
            )),
            None => Arc::new(NoAuth),
        };
        Self::connect_with(ctx, config, Arc::new(transport), auth).await
    }

    /// Connect through a caller-supplied transport and auth provider.
    #[instrument(skip_all, fields(endpoint = %config.endpoint()))]
    pub async fn connect_with(
        ctx: &CallContext,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let pipeline = Arc::new(Pipeline::new(
            transport,
            auth,
            config.retry.clone(),
            Arc::new(BreakerRegistry::new(config.breaker.clone())),
        ));

        let mut negotiator = Negotiator::new(Arc::clone(&pipeline));
        if let Some(matrix) = &config.compatibility_matrix {
            negotiator = negotiator.with_matrix(Arc::clone(matrix));
        }
        if let Some(version) = config.api_version {
            negotiator = negotiator.with_explicit_version(version);
        }

        let sessions = SessionRegistry::new();
        let adapter = sessions
            .get_or_negotiate(ctx, config.endpoint(), &negotiator)
            .await?;
        info!(api_version = %adapter.api_version(), "Slurm client ready");

        Ok(Self {
            config,
            pipeline,
            negotiator,
            sessions,
            current: RwLock::new(adapter),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The adapter bound to the current session.
    pub fn adapter(&self) -> Arc<CapabilityAdapter> {
        Arc::clone(&self.current.read().unwrap_or_else(|p| p.into_inner()))
    }

    /// The negotiated API revision.
    pub fn version(&self) -> ApiVersion {
        self.adapter().api_version()
    }

    pub fn session(&self) -> NegotiatedSession {
        self.adapter().session().clone()
    }

    pub fn supports(&self, op: Operation) -> bool {
        self.adapter().supports(op)
    }

    pub fn jobs(&self) -> JobManager {
        JobManager::new(self.adapter())
    }

    pub fn nodes(&self) -> NodeManager {
        NodeManager::new(self.adapter())
    }

    pub fn partitions(&self) -> PartitionManager {
        PartitionManager::new(self.adapter())
    }

    pub fn accounts(&self) -> AccountManager {
        AccountManager::new(self.adapter())
    }

    pub fn users(&self) -> UserManager {
        UserManager::new(self.adapter())
    }

    pub fn qos(&self) -> QosManager {
        QosManager::new(self.adapter())
    }

    pub fn reservations(&self) -> ReservationManager {
        ReservationManager::new(self.adapter())
    }

    pub fn cluster(&self) -> ClusterManager {
        ClusterManager::new(self.adapter())
    }

    /// Breaker state for this client's endpoint, once a call has been made.
    pub fn breaker_snapshot(&self) -> Option<BreakerSnapshot> {
        self.pipeline.breakers().snapshot(self.config.endpoint())
    }

    /// Negotiate again and replace the cached session.
    ///
    /// Concurrent calls share one discovery round trip. Managers obtained
    /// earlier keep the old revision; fetch new ones to pick up the change.
    #[instrument(skip(self, ctx), fields(endpoint = %self.config.endpoint()))]
    pub async fn renegotiate(&self, ctx: &CallContext) -> Result<ApiVersion> {
        let stale = self.adapter();
        let adapter = self
            .sessions
            .renegotiate(ctx, &stale, &self.negotiator)
            .await?;
        let version = adapter.api_version();
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = adapter;

        info!(previous = %stale.api_version(), current = %version, "Renegotiated");
        Ok(version)
    }

    /// Drop cached sessions and breaker state.
    ///
    /// The current adapter stays usable; its next call starts with a fresh
    /// breaker.
    pub fn close(&self) {
        self.sessions.clear();
        self.pipeline.breakers().clear();
        info!(endpoint = %self.config.endpoint(), "Slurm client closed");
    }
}
