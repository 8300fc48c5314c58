// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request authentication.
//!
//! slurmrestd accepts a user name plus a JWT in two custom headers. The
//! provider is asked for headers on every attempt, so a provider backed by a
//! refreshing token source always sends the current token.

use async_trait::async_trait;
use thiserror::Error;

pub const USER_NAME_HEADER: &str = "X-SLURM-USER-NAME";
pub const USER_TOKEN_HEADER: &str = "X-SLURM-USER-TOKEN";

/// Credentials could not be produced.
#[derive(Debug, Clone, Error)]
#[error("authentication failed: {0}")]
pub struct AuthError(pub String);

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Headers to add to the next request.
    async fn headers(&self) -> Result<Vec<(String, String)>, AuthError>;
}

/// Sends no credentials. Useful behind a trusted proxy or with `auth/local`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthProvider for NoAuth {
    async fn headers(&self) -> Result<Vec<(String, String)>, AuthError> {
        Ok(Vec::new())
    }
}

/// Static user name and JWT.
#[derive(Clone)]
pub struct TokenAuth {
    user_name: String,
    token: String,
}

impl TokenAuth {
    pub fn new(user_name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            token: token.into(),
        }
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }
}

// The token never appears in logs.
impl std::fmt::Debug for TokenAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuth")
            .field("user_name", &self.user_name)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl AuthProvider for TokenAuth {
    async fn headers(&self) -> Result<Vec<(String, String)>, AuthError> {
        if self.token.is_empty() {
            return Err(AuthError("empty JWT".to_string()));
        }
        let mut headers = Vec::with_capacity(2);
        if !self.user_name.is_empty() {
            headers.push((USER_NAME_HEADER.to_string(), self.user_name.clone()));
        }
        headers.push((USER_TOKEN_HEADER.to_string(), self.token.clone()));
        Ok(headers)
    }
}
