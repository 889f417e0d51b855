//! OpenTelemetry tracing instrumentation for asynchronous job-queue
//! client/worker libraries.
//!
//! This crate creates producer spans around job submission (single, bulk,
//! and hierarchical flows), propagates the trace context to the consumer
//! side through a string-keyed carrier inside the job's options, and
//! creates consumer spans around processing that are causally linked to
//! their producers, across processes and however long a job sits in the
//! queue. Secondary lifecycle actions (lock renewal, removal, retry) are
//! recorded as events on the active consumer span.
//!
//! The queue library itself is reached through the trait seams in
//! [`client`]; the instrumentation only calls through and never changes
//! delivery, locking or retry semantics. Errors cross wrapped calls
//! unchanged.
//!
//! # Getting started
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! use opentelemetry_jobqueue::{
//!     InstrumentationConfig, Job, JobOptions, JobQueueInstrumentation, JobSpec, Queue,
//!     QueueError,
//! };
//!
//! struct RedisQueue {
//!     name: String,
//! }
//!
//! #[async_trait]
//! impl Queue for RedisQueue {
//!     fn name(&self) -> &str {
//!         &self.name
//!     }
//!
//!     async fn add(&self, _name: &str, _payload: Value, _opts: JobOptions) -> Result<Job, QueueError> {
//!         // Hand the job to the backend here.
//!         unimplemented!()
//!     }
//!
//!     async fn add_bulk(&self, _specs: Vec<JobSpec>) -> Result<Vec<Job>, QueueError> {
//!         unimplemented!()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), QueueError> {
//!     let instrumentation = JobQueueInstrumentation::new(InstrumentationConfig::default());
//!     let queue = instrumentation.instrument_queue(Arc::new(RedisQueue {
//!         name: "mail".to_owned(),
//!     }));
//!
//!     // Produces one `mail.welcome add` producer span and injects its
//!     // context into the job's headers.
//!     queue
//!         .add("welcome", json!({ "to": "ada@example.com" }), JobOptions::default())
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! Spans are emitted through the globally installed tracer provider, and
//! the carrier wire format is whatever the global
//! [`TextMapPropagator`](opentelemetry::propagation::TextMapPropagator)
//! writes (typically W3C `traceparent`).

pub mod attributes;
pub mod carrier;
pub mod client;

mod consumer;
mod events;
mod instrumentation;
mod producer;
mod registry;
mod span;

pub use client::{
    FlowProducer, FlowSpec, Job, JobHeaders, JobNode, JobOps, JobOptions, JobSpec, ParentOptions,
    Processor, Queue, QueueError, RateLimiterOptions, RepeatOptions, WorkerOptions,
};
pub use consumer::TracedProcessor;
pub use events::TracedJobOps;
pub use instrumentation::{InstrumentationConfig, JobQueueInstrumentation};
pub use producer::{TracedFlowProducer, TracedQueue};
pub use registry::{OpKind, OperationDescriptor, TargetId, TargetRole};
