// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job operations.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use super::revision::{Action, Operation, Resource, Revision};
use super::watch::{WatchEvent, WatchOptions, spawn_poller};
use super::wire::{NoVal, non_empty, noval_time, noval_u32, string_or_list};
use super::{CapabilityAdapter, Plugin, single};
use crate::classify::{ClassifiedError, ErrorKind};
use crate::context::CallContext;
use crate::error::Result;
use crate::transport::Method;
use crate::types::{Job, JobListOptions, JobState, JobSubmission, JobUpdate, Page, SubmitResult};

const fn op(action: Action) -> Operation {
    Operation::new(Resource::Jobs, action)
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub(crate) struct JobsResponse {
    #[serde(default)]
    pub jobs: Vec<WireJob>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct WireJob {
    job_id: Option<u32>,
    name: String,
    user_name: Option<String>,
    account: Option<String>,
    partition: Option<String>,
    qos: Option<String>,
    #[serde(deserialize_with = "string_or_list")]
    job_state: Vec<String>,
    state_reason: Option<String>,
    nodes: Option<String>,
    node_count: Option<NoVal>,
    cpus: Option<NoVal>,
    time_limit: Option<NoVal>,
    priority: Option<NoVal>,
    submit_time: Option<NoVal>,
    start_time: Option<NoVal>,
    end_time: Option<NoVal>,
    exit_code: Option<WireExitCode>,
    #[serde(alias = "minimum_switches")]
    required_switches: Option<NoVal>,
    current_working_directory: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireExitCode {
    return_code: Option<NoVal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SubmitResponse {
    job_id: Option<u32>,
    step_id: Option<String>,
    job_submit_user_msg: Option<String>,
}

fn to_job(wire: WireJob) -> Option<Job> {
    let job_id = wire.job_id?;
    let state = wire
        .job_state
        .first()
        .map(|s| JobState::parse(s))
        .unwrap_or_else(|| JobState::Other("UNKNOWN".to_string()));

    Some(Job {
        job_id,
        name: wire.name,
        user_name: non_empty(wire.user_name),
        account: non_empty(wire.account),
        partition: non_empty(wire.partition),
        qos: non_empty(wire.qos),
        state,
        state_reason: non_empty(wire.state_reason).filter(|r| r != "None"),
        nodes: non_empty(wire.nodes),
        node_count: noval_u32(wire.node_count),
        cpus: noval_u32(wire.cpus),
        time_limit_minutes: noval_u32(wire.time_limit),
        priority: noval_u32(wire.priority),
        submit_time: noval_time(wire.submit_time),
        start_time: noval_time(wire.start_time),
        end_time: noval_time(wire.end_time),
        exit_code: wire
            .exit_code
            .and_then(|e| e.return_code)
            .and_then(|n| n.value())
            .and_then(|n| i32::try_from(n).ok()),
        required_switches: noval_u32(wire.required_switches),
        working_directory: non_empty(wire.current_working_directory),
    })
}

fn to_jobs(response: JobsResponse) -> Vec<Job> {
    let total = response.jobs.len();
    let jobs: Vec<Job> = response.jobs.into_iter().filter_map(to_job).collect();
    if jobs.len() < total {
        debug!(skipped = total - jobs.len(), "Skipped job records without an id");
    }
    jobs
}

// ============================================================================
// Request shapes
// ============================================================================

fn set_noval(desc: &mut Map<String, Value>, field: &str, value: Option<u64>) {
    if let Some(n) = value {
        desc.insert(field.to_string(), json!({"set": true, "infinite": false, "number": n}));
    }
}

fn set_str(desc: &mut Map<String, Value>, field: &str, value: &Option<String>) {
    if let Some(s) = value {
        desc.insert(field.to_string(), Value::String(s.clone()));
    }
}

/// Revision-shaped submit body.
pub(crate) fn submit_body(revision: Revision, job: &JobSubmission) -> std::result::Result<Value, ClassifiedError> {
    job.validate()?;

    let mut desc = Map::new();
    desc.insert("name".into(), Value::String(job.name.clone()));
    desc.insert("script".into(), Value::String(job.script.clone()));
    set_str(&mut desc, "account", &job.account);
    set_str(&mut desc, "partition", &job.partition);
    set_str(&mut desc, "qos", &job.qos);
    set_str(&mut desc, "standard_output", &job.standard_output);
    set_str(&mut desc, "standard_error", &job.standard_error);
    desc.insert(
        "current_working_directory".into(),
        Value::String(job.working_directory.clone().unwrap_or_else(|| "/tmp".to_string())),
    );

    // slurmctld refuses to start batch jobs without any environment.
    let mut environment: Vec<String> = job
        .environment
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    if !job.environment.contains_key("PATH") {
        environment.insert(0, "PATH=/usr/bin:/bin".to_string());
    }
    desc.insert("environment".into(), json!(environment));

    set_noval(&mut desc, "time_limit", job.time_limit_minutes.map(u64::from));
    set_noval(&mut desc, "tasks", job.tasks.map(u64::from));
    set_noval(&mut desc, "cpus_per_task", job.cpus_per_task.map(u64::from));
    set_noval(&mut desc, "memory_per_node", job.memory_per_node_mb);
    if let Some(nodes) = job.nodes {
        desc.insert("nodes".into(), Value::String(nodes.to_string()));
    }
    set_noval(&mut desc, revision.switches_field(), job.required_switches.map(u64::from));

    if let Some(exclusive) = job.exclusive {
        if !revision.accepts_exclusive() {
            return Err(ClassifiedError::validation(format!(
                "the exclusive flag is not accepted by {}",
                revision
            )));
        }
        let flag = if exclusive { "true" } else { "false" };
        desc.insert("exclusive".into(), json!([flag]));
    }

    Ok(json!({ "job": desc }))
}

/// Revision-shaped update body. Only set fields are sent.
pub(crate) fn update_body(update: &JobUpdate) -> std::result::Result<Value, ClassifiedError> {
    update.validate()?;

    let mut desc = Map::new();
    set_str(&mut desc, "name", &update.name);
    set_str(&mut desc, "partition", &update.partition);
    set_str(&mut desc, "qos", &update.qos);
    set_str(&mut desc, "comment", &update.comment);
    set_noval(&mut desc, "time_limit", update.time_limit_minutes.map(u64::from));
    set_noval(&mut desc, "priority", update.priority.map(u64::from));
    if let Some(hold) = update.hold {
        desc.insert("hold".into(), Value::Bool(hold));
    }
    Ok(Value::Object(desc))
}

// ============================================================================
// Manager
// ============================================================================

/// Job operations against the negotiated revision.
#[derive(Debug, Clone)]
pub struct JobManager {
    adapter: Arc<CapabilityAdapter>,
}

impl JobManager {
    pub(crate) fn new(adapter: Arc<CapabilityAdapter>) -> Self {
        Self { adapter }
    }

    async fn fetch_all(&self, ctx: &CallContext) -> Result<Vec<Job>> {
        let request = self.adapter.request(Method::Get, Plugin::Slurm, &["jobs"])?;
        let response: JobsResponse = self.adapter.send_json(ctx, request, "jobs").await?;
        Ok(to_jobs(response))
    }

    /// List jobs, filtering and paging on the client.
    #[instrument(skip(self, ctx, options), fields(api_version = %self.adapter.api_version()))]
    pub async fn list(&self, ctx: &CallContext, options: &JobListOptions) -> Result<Page<Job>> {
        self.adapter.ensure(op(Action::List))?;
        let jobs: Vec<Job> = self
            .fetch_all(ctx)
            .await?
            .into_iter()
            .filter(|job| options.matches(job))
            .collect();
        debug!(matched = jobs.len(), "Listed jobs");
        Ok(Page::slice(jobs, &options.page))
    }

    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn get(&self, ctx: &CallContext, job_id: u32) -> Result<Job> {
        self.adapter.ensure(op(Action::Get))?;
        let id = job_id.to_string();
        let request = self.adapter.request(Method::Get, Plugin::Slurm, &["job", &id])?;
        let response: JobsResponse = self.adapter.send_json(ctx, request, "job").await?;
        single(&self.adapter, to_jobs(response), "job", &id)
    }

    /// Submit a batch job.
    #[instrument(skip(self, ctx, job), fields(name = %job.name, api_version = %self.adapter.api_version()))]
    pub async fn create(&self, ctx: &CallContext, job: &JobSubmission) -> Result<SubmitResult> {
        self.adapter.ensure(op(Action::Create))?;
        let body = submit_body(self.adapter.revision(), job).map_err(|e| self.adapter.fail(e))?;
        let request = self
            .adapter
            .request(Method::Post, Plugin::Slurm, &["job", "submit"])?
            .with_json(&body);

        let response: SubmitResponse = self.adapter.send_json(ctx, request, "job submit").await?;
        let job_id = response.job_id.ok_or_else(|| {
            self.adapter.fail(ClassifiedError::new(
                ErrorKind::Unknown,
                "submit response carried no job id",
            ))
        })?;

        info!(job_id, "Submitted job");
        Ok(SubmitResult {
            job_id,
            step_id: non_empty(response.step_id),
            user_message: non_empty(response.job_submit_user_msg),
        })
    }

    #[instrument(skip(self, ctx, update), fields(api_version = %self.adapter.api_version()))]
    pub async fn update(&self, ctx: &CallContext, job_id: u32, update: &JobUpdate) -> Result<()> {
        self.adapter.ensure(op(Action::Update))?;
        let body = update_body(update).map_err(|e| self.adapter.fail(e))?;
        let id = job_id.to_string();
        let request = self
            .adapter
            .request(Method::Post, Plugin::Slurm, &["job", &id])?
            .with_json(&body);
        self.adapter.send(ctx, request).await?;
        info!(job_id, "Updated job");
        Ok(())
    }

    /// Cancel a job.
    #[instrument(skip(self, ctx), fields(api_version = %self.adapter.api_version()))]
    pub async fn delete(&self, ctx: &CallContext, job_id: u32) -> Result<()> {
        self.adapter.ensure(op(Action::Delete))?;
        let id = job_id.to_string();
        let request = self.adapter.request(Method::Delete, Plugin::Slurm, &["job", &id])?;
        self.adapter.send(ctx, request).await?;
        info!(job_id, "Cancelled job");
        Ok(())
    }

    /// Poll the job list and stream changes. `filter` applies to every poll;
    /// its paging is ignored.
    #[instrument(skip(self, ctx, filter, options), fields(api_version = %self.adapter.api_version()))]
    pub async fn watch(
        &self,
        ctx: &CallContext,
        filter: JobListOptions,
        options: WatchOptions,
    ) -> Result<mpsc::Receiver<WatchEvent<Job>>> {
        self.adapter.ensure(op(Action::Watch))?;
        let manager = self.clone();
        let filter = Arc::new(filter);

        Ok(spawn_poller(
            ctx.child(),
            options,
            move |ctx| {
                let manager = manager.clone();
                let filter = Arc::clone(&filter);
                async move {
                    let jobs = manager.fetch_all(&ctx).await?;
                    Ok(jobs.into_iter().filter(|job| filter.matches(job)).collect())
                }
            },
            |job: &Job| job.job_id.to_string(),
            |job: &Job| job.state.to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support::adapter;
    use crate::error::Error;

    fn wire_job(id: u32, user: &str, state: &str) -> Value {
        json!({
            "job_id": id,
            "name": format!("job-{}", id),
            "user_name": user,
            "account": "physics",
            "partition": "batch",
            "job_state": [state],
            "time_limit": {"set": true, "infinite": false, "number": 60},
            "submit_time": {"set": true, "infinite": false, "number": 1_700_000_000},
            "start_time": {"set": true, "infinite": false, "number": 0},
            "exit_code": {"status": ["SUCCESS"], "return_code": {"set": true, "infinite": false, "number": 0}},
            "minimum_switches": 2
        })
    }

    #[test]
    fn test_wire_job_conversion() {
        let wire: WireJob = serde_json::from_value(wire_job(42, "alice", "RUNNING")).unwrap();
        let job = to_job(wire).unwrap();
        assert_eq!(job.job_id, 42);
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.time_limit_minutes, Some(60));
        assert!(job.submit_time.is_some());
        assert_eq!(job.start_time, None);
        assert_eq!(job.exit_code, Some(0));
        assert_eq!(job.required_switches, Some(2));
    }

    #[test]
    fn test_submit_body_follows_revision() {
        let mut job = JobSubmission::new("sim", "#!/bin/bash\nsrun ./sim").with_time_limit(30);
        job.required_switches = Some(1);

        let v40 = submit_body(Revision::V0_0_40, &job).unwrap();
        assert!(v40["job"].get("minimum_switches").is_some());
        assert!(v40["job"].get("required_switches").is_none());
        assert_eq!(v40["job"]["time_limit"]["number"], 30);
        assert_eq!(v40["job"]["environment"][0], "PATH=/usr/bin:/bin");

        let v42 = submit_body(Revision::V0_0_42, &job).unwrap();
        assert!(v42["job"].get("required_switches").is_some());

        job.exclusive = Some(true);
        assert!(submit_body(Revision::V0_0_41, &job).is_ok());
        let err = submit_body(Revision::V0_0_42, &job).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let (adapter, recorder) = adapter(Revision::V0_0_42);
        recorder.reply(
            200,
            json!({"jobs": [
                wire_job(1, "alice", "RUNNING"),
                wire_job(2, "bob", "RUNNING"),
                wire_job(3, "alice", "PENDING"),
                wire_job(4, "alice", "COMPLETED"),
            ]}),
        );

        let options = JobListOptions {
            users: vec!["alice".into()],
            states: vec![JobState::Running, JobState::Pending],
            page: crate::types::ListOptions::new(1, 10),
            ..JobListOptions::default()
        };
        let page = JobManager::new(adapter)
            .list(&CallContext::new(), &options)
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].job_id, 3);
        assert!(recorder.last().url.ends_with("/slurm/v0.0.42/jobs"));
    }

    #[tokio::test]
    async fn test_get_missing_job_is_not_found() {
        let (adapter, recorder) = adapter(Revision::V0_0_41);
        recorder.reply(200, json!({"jobs": []}));
        let err = JobManager::new(adapter)
            .get(&CallContext::new(), 99)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_create_posts_and_reads_id() {
        let (adapter, recorder) = adapter(Revision::V0_0_43);
        recorder.reply(200, json!({"job_id": 1234, "step_id": "batch", "job_submit_user_msg": ""}));

        let result = JobManager::new(adapter)
            .create(&CallContext::new(), &JobSubmission::new("a", "#!/bin/sh\ntrue"))
            .await
            .unwrap();
        assert_eq!(result.job_id, 1234);
        assert_eq!(result.user_message, None);

        let request = recorder.last();
        assert_eq!(request.method, Method::Post);
        assert!(request.url.ends_with("/slurm/v0.0.43/job/submit"));
        assert_eq!(recorder.last_body()["job"]["name"], "a");
    }

    #[tokio::test]
    async fn test_invalid_submission_never_reaches_network() {
        let (adapter, recorder) = adapter(Revision::V0_0_43);
        let err = JobManager::new(adapter)
            .create(&CallContext::new(), &JobSubmission::new("a", "no shebang"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(recorder.count(), 0);
    }

    #[tokio::test]
    async fn test_update_and_watch_are_gated_by_revision() {
        let (adapter, recorder) = adapter(Revision::V0_0_40);
        let jobs = JobManager::new(adapter);
        let update = JobUpdate {
            time_limit_minutes: Some(10),
            ..JobUpdate::default()
        };

        let err = jobs.update(&CallContext::new(), 1, &update).await.unwrap_err();
        assert!(matches!(err, Error::NotImplemented { .. }));
        let err = jobs
            .watch(&CallContext::new(), JobListOptions::default(), WatchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
        assert_eq!(recorder.count(), 0);
    }

    #[tokio::test]
    async fn test_update_sends_only_set_fields() {
        let (adapter, recorder) = adapter(Revision::V0_0_41);
        let update = JobUpdate {
            priority: Some(100),
            hold: Some(true),
            ..JobUpdate::default()
        };
        JobManager::new(adapter)
            .update(&CallContext::new(), 7, &update)
            .await
            .unwrap();

        let body = recorder.last_body();
        assert_eq!(body["priority"]["number"], 100);
        assert_eq!(body["hold"], true);
        assert!(body.get("name").is_none());
        assert!(recorder.last().url.ends_with("/slurm/v0.0.41/job/7"));
    }
}
