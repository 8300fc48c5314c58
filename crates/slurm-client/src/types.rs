// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Version-independent resource model.
//!
//! Every adapter converts its revision-shaped payloads into these types, so
//! code using the client never sees which API revision was negotiated.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ClassifiedError;
use crate::version::ApiVersion;

// ============================================================================
// Paging
// ============================================================================

/// Offset/limit window applied to list results.
///
/// Slurm does not page server-side, so the full result set is fetched and
/// sliced locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub offset: usize,
    /// `None` returns everything from `offset` on.
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }
}

/// One window of a list result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of items before slicing.
    pub total: usize,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl<T> Page<T> {
    /// Slice `all` according to `options`.
    pub fn slice(mut all: Vec<T>, options: &ListOptions) -> Self {
        let total = all.len();
        let start = options.offset.min(total);
        let end = match options.limit {
            Some(limit) => start.saturating_add(limit).min(total),
            None => total,
        };
        all.truncate(end);
        let items = all.split_off(start);
        Self {
            items,
            total,
            offset: options.offset,
            limit: options.limit,
        }
    }

    pub fn has_more(&self) -> bool {
        self.offset.saturating_add(self.items.len()) < self.total
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// Base job state, without Slurm's extra flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobState {
    Pending,
    Running,
    Suspended,
    Completing,
    Completed,
    Cancelled,
    Failed,
    Timeout,
    NodeFail,
    Preempted,
    OutOfMemory,
    BootFail,
    Deadline,
    Other(String),
}

impl JobState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "SUSPENDED" => Self::Suspended,
            "COMPLETING" => Self::Completing,
            "COMPLETED" => Self::Completed,
            "CANCELLED" => Self::Cancelled,
            "FAILED" => Self::Failed,
            "TIMEOUT" => Self::Timeout,
            "NODE_FAIL" => Self::NodeFail,
            "PREEMPTED" => Self::Preempted,
            "OUT_OF_MEMORY" => Self::OutOfMemory,
            "BOOT_FAIL" => Self::BootFail,
            "DEADLINE" => Self::Deadline,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Suspended => "SUSPENDED",
            Self::Completing => "COMPLETING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::NodeFail => "NODE_FAIL",
            Self::Preempted => "PREEMPTED",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::BootFail => "BOOT_FAIL",
            Self::Deadline => "DEADLINE",
            Self::Other(raw) => raw,
        }
    }

    /// The job will not run again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Cancelled
                | Self::Failed
                | Self::Timeout
                | Self::NodeFail
                | Self::Preempted
                | Self::OutOfMemory
                | Self::BootFail
                | Self::Deadline
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for JobState {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: u32,
    pub name: String,
    pub user_name: Option<String>,
    pub account: Option<String>,
    pub partition: Option<String>,
    pub qos: Option<String>,
    pub state: JobState,
    pub state_reason: Option<String>,
    /// Allocated node list, e.g. `node[01-04]`.
    pub nodes: Option<String>,
    pub node_count: Option<u32>,
    pub cpus: Option<u32>,
    /// `None` means unlimited.
    pub time_limit_minutes: Option<u32>,
    pub priority: Option<u32>,
    pub submit_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub required_switches: Option<u32>,
    pub working_directory: Option<String>,
}

/// A batch job to submit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub name: String,
    /// Batch script, starting with a `#!` line.
    pub script: String,
    pub account: Option<String>,
    pub partition: Option<String>,
    pub qos: Option<String>,
    pub working_directory: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub time_limit_minutes: Option<u32>,
    pub nodes: Option<u32>,
    pub tasks: Option<u32>,
    pub cpus_per_task: Option<u32>,
    pub memory_per_node_mb: Option<u64>,
    pub required_switches: Option<u32>,
    /// Only accepted by revisions up to v0.0.41.
    pub exclusive: Option<bool>,
    pub standard_output: Option<String>,
    pub standard_error: Option<String>,
}

impl JobSubmission {
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            ..Self::default()
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_time_limit(mut self, minutes: u32) -> Self {
        self.time_limit_minutes = Some(minutes);
        self
    }

    pub fn with_nodes(mut self, nodes: u32) -> Self {
        self.nodes = Some(nodes);
        self
    }

    pub fn validate(&self) -> Result<(), ClassifiedError> {
        if self.name.trim().is_empty() {
            return Err(ClassifiedError::validation("job name must not be empty"));
        }
        if !self.script.starts_with("#!") {
            return Err(ClassifiedError::validation(
                "job script must start with a '#!' interpreter line",
            ));
        }
        if self.nodes == Some(0) {
            return Err(ClassifiedError::validation("node count must be positive"));
        }
        if self.time_limit_minutes == Some(0) {
            return Err(ClassifiedError::validation("time limit must be positive"));
        }
        Ok(())
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub job_id: u32,
    pub step_id: Option<String>,
    /// Message from the job submit plugin, if any.
    pub user_message: Option<String>,
}

/// Changes to a queued or running job. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub time_limit_minutes: Option<u32>,
    pub priority: Option<u32>,
    pub partition: Option<String>,
    pub qos: Option<String>,
    pub comment: Option<String>,
    pub hold: Option<bool>,
}

impl JobUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<(), ClassifiedError> {
        if self.is_empty() {
            return Err(ClassifiedError::validation("job update changes nothing"));
        }
        if self.time_limit_minutes == Some(0) {
            return Err(ClassifiedError::validation("time limit must be positive"));
        }
        Ok(())
    }
}

/// Filters and paging for job listing. Filters are applied client-side;
/// an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobListOptions {
    pub users: Vec<String>,
    pub accounts: Vec<String>,
    pub partitions: Vec<String>,
    pub states: Vec<JobState>,
    pub page: ListOptions,
}

impl JobListOptions {
    pub fn matches(&self, job: &Job) -> bool {
        fn any_of(filter: &[String], value: Option<&String>) -> bool {
            filter.is_empty() || value.is_some_and(|v| filter.iter().any(|f| f == v))
        }

        any_of(&self.users, job.user_name.as_ref())
            && any_of(&self.accounts, job.account.as_ref())
            && any_of(&self.partitions, job.partition.as_ref())
            && (self.states.is_empty() || self.states.contains(&job.state))
    }
}

// ============================================================================
// Nodes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// Base state first, then flags, e.g. `["IDLE", "DRAIN"]`.
    pub state: Vec<String>,
    pub cpus: Option<u32>,
    pub real_memory_mb: Option<u64>,
    pub partitions: Vec<String>,
    pub features: Vec<String>,
    pub reason: Option<String>,
    pub architecture: Option<String>,
}

impl Node {
    /// State flags joined with `+`, Slurm's usual rendering.
    pub fn state_label(&self) -> String {
        self.state.join("+")
    }

    pub fn is_drained(&self) -> bool {
        self.state.iter().any(|s| s == "DRAIN" || s == "DRAINED")
    }
}

/// Changes to a node. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    /// Target state such as `DRAIN`, `RESUME` or `DOWN`.
    pub state: Option<String>,
    pub reason: Option<String>,
    pub features: Option<Vec<String>>,
    pub comment: Option<String>,
}

impl NodeUpdate {
    pub fn drain(reason: impl Into<String>) -> Self {
        Self {
            state: Some("DRAIN".to_string()),
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn resume() -> Self {
        Self {
            state: Some("RESUME".to_string()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ClassifiedError> {
        if self == &Self::default() {
            return Err(ClassifiedError::validation("node update changes nothing"));
        }
        let needs_reason = self
            .state
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("DRAIN") || s.eq_ignore_ascii_case("DOWN"));
        if needs_reason && self.reason.as_deref().is_none_or(|r| r.trim().is_empty()) {
            return Err(ClassifiedError::validation(
                "a reason is required to drain or down a node",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Partitions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub state: Vec<String>,
    pub nodes: Option<String>,
    pub total_nodes: Option<u32>,
    pub total_cpus: Option<u32>,
    /// `None` means unlimited.
    pub max_time_minutes: Option<u32>,
    pub is_default: bool,
}

// ============================================================================
// Accounting: accounts, users, QoS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub description: String,
    pub organization: String,
    pub coordinators: Vec<String>,
}

impl Account {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            organization: organization.into(),
            coordinators: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ClassifiedError> {
        validate_name("account", &self.name)?;
        if self.description.trim().is_empty() || self.organization.trim().is_empty() {
            return Err(ClassifiedError::validation(
                "account description and organization are required",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub default_account: Option<String>,
    pub default_wckey: Option<String>,
    /// `None`, `Operator` or `Administrator`.
    pub admin_level: Option<String>,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_default_account(mut self, account: impl Into<String>) -> Self {
        self.default_account = Some(account.into());
        self
    }

    pub fn validate(&self) -> Result<(), ClassifiedError> {
        validate_name("user", &self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Qos {
    pub name: String,
    pub description: Option<String>,
    pub priority: Option<u32>,
    /// Per-job wall clock limit. `None` means unlimited.
    pub max_wall_minutes_per_job: Option<u32>,
    pub flags: Vec<String>,
}

impl Qos {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ClassifiedError> {
        validate_name("qos", &self.name)
    }
}

// ============================================================================
// Reservations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub name: String,
    pub node_list: Option<String>,
    pub node_count: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub users: Vec<String>,
    pub accounts: Vec<String>,
    pub partition: Option<String>,
    pub flags: Vec<String>,
}

impl Reservation {
    pub fn new(name: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            node_list: None,
            node_count: None,
            start_time: Some(start),
            end_time: Some(end),
            users: Vec::new(),
            accounts: Vec::new(),
            partition: None,
            flags: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ClassifiedError> {
        validate_name("reservation", &self.name)?;
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start >= end {
                return Err(ClassifiedError::validation(
                    "reservation must end after it starts",
                ));
            }
        }
        if self.users.is_empty() && self.accounts.is_empty() {
            return Err(ClassifiedError::validation(
                "reservation needs at least one user or account",
            ));
        }
        if self.node_list.is_none() && self.node_count.is_none() && self.partition.is_none() {
            return Err(ClassifiedError::validation(
                "reservation needs a node list, node count or partition",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Cluster
// ============================================================================

/// Result of pinging one controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerPing {
    pub hostname: String,
    pub responding: bool,
    /// `primary`, `backup1`, ...
    pub mode: Option<String>,
    pub latency_us: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_name: Option<String>,
    /// Slurm release reported by the daemon, e.g. `25.05.1`.
    pub release: Option<String>,
    pub api_version: ApiVersion,
    pub controllers: Vec<ControllerPing>,
}

impl ClusterInfo {
    pub fn is_healthy(&self) -> bool {
        self.controllers.iter().any(|c| c.responding)
    }
}

fn validate_name(what: &str, name: &str) -> Result<(), ClassifiedError> {
    if name.trim().is_empty() {
        return Err(ClassifiedError::validation(format!(
            "{} name must not be empty",
            what
        )));
    }
    if name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(ClassifiedError::validation(format!(
            "{} name '{}' contains '/' or whitespace",
            what, name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: u32, user: &str, state: JobState) -> Job {
        Job {
            job_id: id,
            name: format!("job-{}", id),
            user_name: Some(user.to_string()),
            account: Some("physics".to_string()),
            partition: Some("batch".to_string()),
            qos: None,
            state,
            state_reason: None,
            nodes: None,
            node_count: None,
            cpus: None,
            time_limit_minutes: None,
            priority: None,
            submit_time: None,
            start_time: None,
            end_time: None,
            exit_code: None,
            required_switches: None,
            working_directory: None,
        }
    }

    #[test]
    fn test_page_slicing() {
        let page = Page::slice((0..10).collect::<Vec<_>>(), &ListOptions::new(3, 4));
        assert_eq!(page.items, vec![3, 4, 5, 6]);
        assert_eq!(page.total, 10);
        assert!(page.has_more());

        let tail = Page::slice((0..10).collect::<Vec<_>>(), &ListOptions::new(8, 5));
        assert_eq!(tail.items, vec![8, 9]);
        assert!(!tail.has_more());

        let past_end = Page::slice((0..3).collect::<Vec<_>>(), &ListOptions::new(10, 5));
        assert!(past_end.is_empty());
        assert_eq!(past_end.total, 3);

        let all = Page::slice((0..3).collect::<Vec<_>>(), &ListOptions::default());
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_job_state_parse_round_trip() {
        assert_eq!(JobState::parse("running"), JobState::Running);
        assert_eq!(JobState::parse("NODE_FAIL"), JobState::NodeFail);
        assert_eq!(JobState::parse("RESV_DEL_HOLD").as_str(), "RESV_DEL_HOLD");
        assert!(JobState::Timeout.is_terminal());
        assert!(!JobState::Pending.is_terminal());
    }

    #[test]
    fn test_job_filters() {
        let options = JobListOptions {
            users: vec!["alice".into()],
            states: vec![JobState::Running, JobState::Pending],
            ..JobListOptions::default()
        };
        assert!(options.matches(&job(1, "alice", JobState::Running)));
        assert!(!options.matches(&job(2, "bob", JobState::Running)));
        assert!(!options.matches(&job(3, "alice", JobState::Completed)));
        assert!(JobListOptions::default().matches(&job(4, "bob", JobState::Failed)));
    }

    #[test]
    fn test_submission_validation() {
        assert!(JobSubmission::new("hello", "#!/bin/bash\necho hi").validate().is_ok());
        assert!(JobSubmission::new("", "#!/bin/bash").validate().is_err());
        assert!(JobSubmission::new("hello", "echo hi").validate().is_err());
        assert!(
            JobSubmission::new("hello", "#!/bin/sh")
                .with_nodes(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_node_drain_requires_reason() {
        assert!(NodeUpdate::drain("bad dimm").validate().is_ok());
        assert!(NodeUpdate::resume().validate().is_ok());
        let no_reason = NodeUpdate {
            state: Some("drain".into()),
            ..NodeUpdate::default()
        };
        assert!(no_reason.validate().is_err());
        assert!(NodeUpdate::default().validate().is_err());
    }

    #[test]
    fn test_reservation_validation() {
        let start = Utc::now();
        let end = start + chrono::Duration::hours(2);
        let mut resv = Reservation::new("maint", start, end);
        assert!(resv.validate().is_err());
        resv.users.push("root".into());
        resv.node_list = Some("node[01-04]".into());
        assert!(resv.validate().is_ok());

        resv.end_time = Some(start);
        assert!(resv.validate().is_err());
    }

    #[test]
    fn test_names_are_checked() {
        assert!(Account::new("physics", "Physics dept", "uni").validate().is_ok());
        assert!(Account::new("phys ics", "d", "o").validate().is_err());
        assert!(Account::new("physics", "", "o").validate().is_err());
        assert!(User::new("a/b").validate().is_err());
        assert!(Qos::new("normal").validate().is_ok());
    }
}
