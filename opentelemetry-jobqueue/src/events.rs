//! Lifecycle event recording for secondary per-job actions.
//!
//! Lock renewal, removal and retry requests are not separately traced.
//! While wrapped, they attach a named event to whatever span is active in
//! the ambient context, normally the consumer span of the job being
//! processed, and otherwise leave the action alone.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::{trace::TraceContextExt, Context, KeyValue};

use crate::attributes;
use crate::client::{Job, JobOps, QueueError};
use crate::instrumentation::Inner;
use crate::registry::{OpKind, TargetId};

/// Attaches a named event with current job attributes to the active span,
/// if any. Never creates or ends spans.
pub(crate) fn record_job_event(name: &'static str, job: &Job) {
    Context::map_current(|cx| {
        if !cx.has_active_span() {
            return;
        }
        let mut event_attributes = vec![
            KeyValue::new(attributes::JOB_NAME, job.name.clone()),
            KeyValue::new(attributes::JOB_TIMESTAMP, job.timestamp as i64),
            KeyValue::new(attributes::JOB_ATTEMPTS, job.attempts_made as i64),
        ];
        if let Some(processed_on) = job.processed_on {
            event_attributes.push(KeyValue::new(
                attributes::JOB_PROCESSED_TIMESTAMP,
                processed_on as i64,
            ));
        }
        cx.span().add_event(name, event_attributes);
    });
}

/// A [`JobOps`] handle that records lifecycle events while the owning
/// instrumentation is enabled. Results and errors pass through unmodified.
pub struct TracedJobOps {
    inner: Arc<dyn JobOps>,
    target: TargetId,
    instrumentation: Arc<Inner>,
}

impl TracedJobOps {
    pub(crate) fn new(inner: Arc<dyn JobOps>, target: TargetId, instrumentation: Arc<Inner>) -> Self {
        TracedJobOps {
            inner,
            target,
            instrumentation,
        }
    }

    fn record(&self, op: OpKind, job: &Job) {
        if self.instrumentation.active(self.target, op).is_some() {
            record_job_event(op.label(), job);
        }
    }
}

#[async_trait]
impl JobOps for TracedJobOps {
    fn supported_operations(&self) -> &'static [OpKind] {
        self.inner.supported_operations()
    }

    async fn extend_lock(
        &self,
        job: &Job,
        token: &str,
        duration_ms: u64,
    ) -> Result<(), QueueError> {
        self.record(OpKind::ExtendLock, job);
        self.inner.extend_lock(job, token, duration_ms).await
    }

    async fn remove(&self, job: &Job) -> Result<(), QueueError> {
        self.record(OpKind::Remove, job);
        self.inner.remove(job).await
    }

    async fn retry(&self, job: &Job) -> Result<(), QueueError> {
        self.record(OpKind::Retry, job);
        self.inner.retry(job).await
    }
}
