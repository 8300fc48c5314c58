// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Version identifiers.
//!
//! Two kinds of versions show up when talking to a Slurm REST daemon:
//!
//! - [`ApiVersion`]: the REST API revision (`v0.0.42`), which decides the
//!   URL prefix, the field set and which operations exist.
//! - [`ProductVersion`]: the Slurm release the daemon was built from
//!   (`25.05.1`), reported by the discovery document.
//!
//! Both are ordered numeric triples and are immutable once parsed.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A version string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{input}': {reason}")]
pub struct ParseError {
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

impl ParseError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

fn parse_triple(original: &str, digits: &str) -> Result<(u32, u32, u32), ParseError> {
    if digits.is_empty() {
        return Err(ParseError::new(original, "empty version"));
    }

    let mut parts = digits.split('.');
    let mut next = |name: &'static str| -> Result<u32, ParseError> {
        let part = parts
            .next()
            .ok_or_else(|| ParseError::new(original, "expected three dot-separated components"))?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::new(original, name));
        }
        part.parse::<u32>()
            .map_err(|_| ParseError::new(original, "component out of range"))
    };

    let major = next("major component is not a number")?;
    let minor = next("minor component is not a number")?;
    let patch = next("patch component is not a number")?;

    if parts.next().is_some() {
        return Err(ParseError::new(
            original,
            "expected three dot-separated components",
        ));
    }

    Ok((major, minor, patch))
}

// ============================================================================
// ApiVersion
// ============================================================================

/// A REST API revision such as `v0.0.42`.
///
/// Ordering is numeric on (major, minor, patch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiVersion {
    major: u32,
    minor: u32,
    patch: u32,
}

impl ApiVersion {
    /// Build a version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `v0.0.42` or `0.0.42`.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let trimmed = input.trim();
        let digits = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let (major, minor, patch) = parse_triple(input, digits)?;
        Ok(Self::new(major, minor, patch))
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }

    /// Total order between two versions.
    pub fn compare(a: &ApiVersion, b: &ApiVersion) -> Ordering {
        a.cmp(b)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ApiVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ApiVersion {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ApiVersion> for String {
    fn from(version: ApiVersion) -> Self {
        version.to_string()
    }
}

// ============================================================================
// ProductVersion
// ============================================================================

/// A Slurm release such as `25.05.1`.
///
/// The minor component is zero-padded on display to match Slurm's
/// `YY.MM.patch` release naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductVersion {
    major: u32,
    minor: u32,
    patch: u32,
}

impl ProductVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `25.05.1`, optionally prefixed with `Slurm-`.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let trimmed = input.trim();
        let digits = trimmed.strip_prefix("Slurm-").unwrap_or(trimmed);
        let (major, minor, patch) = parse_triple(input, digits)?;
        Ok(Self::new(major, minor, patch))
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ProductVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ProductVersion {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProductVersion> for String {
    fn from(version: ProductVersion) -> Self {
        version.to_string()
    }
}
