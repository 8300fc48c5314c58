// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Caller-facing error type.

use thiserror::Error;

use crate::adapter::Operation;
use crate::classify::{ClassifiedError, ErrorKind};
use crate::compat::NoMatchError;
use crate::version::{ApiVersion, ParseError};

/// Errors returned by the client.
///
/// Every variant maps to one [`ErrorKind`], so callers can branch on
/// [`Error::kind`] without matching variants. `NotImplemented` and
/// `UnsupportedVersion` are never retryable.
#[derive(Debug, Error)]
pub enum Error {
    /// A call reached the pipeline and failed.
    #[error("request to {endpoint} failed: {source}")]
    Api {
        endpoint: String,
        /// `None` when the call happened before negotiation finished.
        api_version: Option<ApiVersion>,
        #[source]
        source: ClassifiedError,
    },

    /// The negotiated API revision does not offer the operation.
    #[error("{operation} is not available in Slurm REST API {api_version}")]
    NotImplemented {
        operation: Operation,
        api_version: ApiVersion,
    },

    /// No compiled-in adapter can serve the server.
    #[error("no adapter for {requested}; nearest available is {nearest}")]
    UnsupportedVersion {
        requested: String,
        nearest: ApiVersion,
    },

    #[error(transparent)]
    NoMatch(#[from] NoMatchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn api(
        endpoint: impl Into<String>,
        api_version: Option<ApiVersion>,
        source: ClassifiedError,
    ) -> Self {
        Self::Api {
            endpoint: endpoint.into(),
            api_version,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api { source, .. } => source.kind(),
            Self::NotImplemented { .. } => ErrorKind::NotImplemented,
            Self::UnsupportedVersion { .. } | Self::NoMatch(_) => ErrorKind::UnsupportedVersion,
            Self::Parse(_) | Self::Config(_) => ErrorKind::Validation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The classified failure behind an `Api` error.
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Api { source, .. } => Some(source),
            _ => None,
        }
    }

    /// HTTP status of the failed response, if there was one.
    pub fn status_code(&self) -> Option<u16> {
        self.classified().and_then(|c| c.status_code())
    }

    /// API revision in effect when the error happened.
    pub fn api_version(&self) -> Option<ApiVersion> {
        match self {
            Self::Api { api_version, .. } => *api_version,
            Self::NotImplemented { api_version, .. } => Some(*api_version),
            _ => None,
        }
    }
}
