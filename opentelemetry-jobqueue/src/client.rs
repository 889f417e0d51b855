//! Contract between the instrumentation and the queue library it observes.
//!
//! The queue/broker itself is an external collaborator: it owns delivery,
//! locking and retry scheduling. This module defines the trait seams that
//! collaborator implements and the minimal view of its data the
//! instrumentation reads. Everything here round-trips through the queue's
//! own serialization, so the types derive [`serde`] and keep the carrier
//! headers intact on the wire.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::registry::{OpKind, TargetRole};

/// String-keyed metadata embedded in [`JobOptions`]; doubles as the trace
/// context carrier. The queue backend must preserve it verbatim across
/// process boundaries.
pub type JobHeaders = HashMap<String, String>;

/// Errors surfaced by the queue collaborator or a processing callback.
///
/// The instrumentation never converts or swallows these: they cross wrapped
/// calls unchanged so the queue library's own retry and failure bookkeeping
/// is unaffected.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backend rejected or failed an operation.
    #[error("queue backend error: {0}")]
    Backend(String),
    /// A processing callback failed with its own message.
    #[error("{0}")]
    Processing(String),
    /// A job or its options could not be (de)serialized for transport.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Rate-limiter configuration of a worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterOptions {
    /// Maximum number of jobs processed per window.
    pub max: u32,
    /// Window length in milliseconds.
    pub duration_ms: u64,
    /// Optional grouping key limiting jobs per group instead of per worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
}

/// Parent linkage of a hierarchical (flow) job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParentOptions {
    /// Key of the parent job this job belongs to.
    pub parent_key: String,
    /// Key the parent waits on until all children complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_children_key: Option<String>,
}

/// Repeat-schedule configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepeatOptions {
    /// Cron-style schedule pattern.
    pub pattern: String,
    /// Maximum number of repetitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Options attached to a submitted job.
///
/// `headers` is the propagation carrier; unrelated keys placed there by the
/// application are preserved by injection.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Delay before the job becomes available, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// Maximum delivery attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Scheduling priority.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    /// Repeat schedule, if the job recurs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatOptions>,
    /// Parent linkage for flow jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentOptions>,
    /// Carrier metadata.
    #[serde(default)]
    pub headers: JobHeaders,
}

/// The queue's view of one job, reduced to the fields the instrumentation
/// reads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    /// Backend-assigned identifier; `None` until the backend stored the job.
    pub id: Option<String>,
    /// Job name as given at submission.
    pub name: String,
    /// Destination queue.
    pub queue_name: String,
    /// Creation time, unix epoch milliseconds.
    pub timestamp: u64,
    /// Application payload.
    pub payload: Value,
    /// Submission options, including the carrier.
    #[serde(default)]
    pub opts: JobOptions,
    /// Completed processing attempts before the current one.
    #[serde(default)]
    pub attempts_made: u32,
    /// When processing of the current attempt began, epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_on: Option<u64>,
    /// When the job finished (completed or failed), epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<u64>,
    /// Failure message of the last failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    /// Key of the repeat schedule that produced this job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_job_key: Option<String>,
}

/// One entry of a bulk submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub payload: Value,
    #[serde(default)]
    pub opts: JobOptions,
}

/// One node of a hierarchical submission. Children are processed before the
/// parent becomes available.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowSpec {
    pub name: String,
    pub queue_name: String,
    pub payload: Value,
    #[serde(default)]
    pub opts: JobOptions,
    #[serde(default)]
    pub children: Vec<FlowSpec>,
}

/// A submitted flow node together with its submitted children.
#[derive(Clone, Debug)]
pub struct JobNode {
    pub job: Job,
    pub children: Vec<JobNode>,
}

/// Static configuration of the worker whose processor is instrumented.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerOptions {
    /// Worker identity.
    pub name: String,
    /// Number of jobs processed concurrently.
    pub concurrency: u32,
    /// Duration a job lock is held, in milliseconds.
    pub lock_duration_ms: u64,
    /// Interval at which locks are renewed, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_renew_time_ms: Option<u64>,
    /// Rate limiting, if configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limiter: Option<RateLimiterOptions>,
}

/// Producer side of the queue collaborator.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Destination queue name.
    fn name(&self) -> &str;

    /// Operations this client version actually exposes. Unsupported
    /// operations are skipped (with a diagnostic) when instrumentation is
    /// enabled; everything else still gets wrapped.
    fn supported_operations(&self) -> &'static [OpKind] {
        OpKind::for_role(TargetRole::Queue)
    }

    /// Submits one job and returns it as stored by the backend.
    async fn add(&self, name: &str, payload: Value, opts: JobOptions) -> Result<Job, QueueError>;

    /// Submits a batch of jobs in a single backend call.
    async fn add_bulk(&self, specs: Vec<JobSpec>) -> Result<Vec<Job>, QueueError>;
}

/// Producer for hierarchical job graphs.
#[async_trait]
pub trait FlowProducer: Send + Sync {
    /// See [`Queue::supported_operations`].
    fn supported_operations(&self) -> &'static [OpKind] {
        OpKind::for_role(TargetRole::FlowProducer)
    }

    /// Submits a whole flow as one external call.
    async fn add_flow(&self, spec: FlowSpec) -> Result<JobNode, QueueError>;

    /// Submits several flows as one external call.
    async fn add_bulk(&self, specs: Vec<FlowSpec>) -> Result<Vec<JobNode>, QueueError>;
}

/// The single processing entry point a worker drives once per delivered job.
///
/// The worker library may update the job (timestamps, failure reason) while
/// a call is in flight, which is why the job is passed as `&mut`.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, job: &mut Job) -> Result<Value, QueueError>;
}

/// Secondary per-job operations available while a job is being processed.
/// These are not separately traced; the instrumentation only records them as
/// events on the surrounding consumer span.
#[async_trait]
pub trait JobOps: Send + Sync {
    /// See [`Queue::supported_operations`].
    fn supported_operations(&self) -> &'static [OpKind] {
        OpKind::for_role(TargetRole::Job)
    }

    /// Extends the processing lock on an active job.
    async fn extend_lock(&self, job: &Job, token: &str, duration_ms: u64)
        -> Result<(), QueueError>;

    /// Removes a job from the queue.
    async fn remove(&self, job: &Job) -> Result<(), QueueError>;

    /// Requests a retry of a failed job.
    async fn retry(&self, job: &Job) -> Result<(), QueueError>;
}
