// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared pieces of the Slurm wire format.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::classify::ClassifiedError;

/// Slurm's optional-number envelope: `{"set": true, "infinite": false, "number": 42}`.
///
/// Older payloads sometimes carry a bare number instead, which decodes as a
/// set value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawNoVal")]
pub(crate) struct NoVal {
    pub set: bool,
    pub infinite: bool,
    pub number: i64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNoVal {
    Bare(i64),
    Envelope {
        #[serde(default)]
        set: bool,
        #[serde(default)]
        infinite: bool,
        #[serde(default)]
        number: i64,
    },
}

impl From<RawNoVal> for NoVal {
    fn from(raw: RawNoVal) -> Self {
        match raw {
            RawNoVal::Bare(number) => Self::number(number),
            RawNoVal::Envelope {
                set,
                infinite,
                number,
            } => Self {
                set,
                infinite,
                number,
            },
        }
    }
}

impl NoVal {
    pub fn number(number: i64) -> Self {
        Self {
            set: true,
            infinite: false,
            number,
        }
    }

    /// Finite value, if set.
    pub fn value(&self) -> Option<i64> {
        (self.set && !self.infinite).then_some(self.number)
    }
}

pub(crate) fn noval_u32(value: Option<NoVal>) -> Option<u32> {
    value
        .and_then(|v| v.value())
        .and_then(|n| u32::try_from(n).ok())
}

pub(crate) fn noval_u64(value: Option<NoVal>) -> Option<u64> {
    value
        .and_then(|v| v.value())
        .and_then(|n| u64::try_from(n).ok())
}

/// Unix timestamp envelope to a UTC time. Zero means "not yet".
pub(crate) fn noval_time(value: Option<NoVal>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.value())
        .filter(|secs| *secs > 0)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

pub(crate) fn time_noval(time: DateTime<Utc>) -> NoVal {
    NoVal::number(time.timestamp())
}

/// Accept `"A"`, `"A,B"` or `["A", "B"]`.
pub(crate) fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
        Null(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::One(s) => split_csv(&s),
        Raw::Many(list) => list,
        Raw::Null(()) => Vec::new(),
    })
}

pub(crate) fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Empty strings from Slurm mean "unset".
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Decode a 2xx response body.
pub(crate) fn decode<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T, ClassifiedError> {
    serde_json::from_slice(body)
        .map_err(|e| ClassifiedError::malformed(format!("malformed {} response", what), e))
}
