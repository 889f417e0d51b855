//! Consumer-side propagation: the traced processing entry point.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::{
    trace::{FutureExt, SpanKind},
    Context, KeyValue,
};
use opentelemetry_semantic_conventions::attribute as semconv;
use serde_json::Value;

use crate::attributes;
use crate::carrier;
use crate::client::{Job, Processor, QueueError, WorkerOptions};
use crate::instrumentation::Inner;
use crate::registry::{OpKind, TargetId};
use crate::span::{SpanFactory, SpanHandle};

/// A [`Processor`] whose invocations are traced while the owning
/// instrumentation is enabled.
///
/// Each call extracts the producer's context from the job carrier; jobs
/// without one, enqueued before instrumentation existed, get a fresh root.
/// The consumer span for the current attempt stays open for however long
/// the inner processor suspends.
pub struct TracedProcessor {
    inner: Arc<dyn Processor>,
    worker: WorkerOptions,
    target: TargetId,
    instrumentation: Arc<Inner>,
}

impl TracedProcessor {
    pub(crate) fn new(
        inner: Arc<dyn Processor>,
        worker: WorkerOptions,
        target: TargetId,
        instrumentation: Arc<Inner>,
    ) -> Self {
        TracedProcessor {
            inner,
            worker,
            target,
            instrumentation,
        }
    }

    fn consumer_attributes(&self, job: &Job, attempt: u32) -> Vec<KeyValue> {
        let mut span_attributes = vec![
            KeyValue::new(semconv::MESSAGING_SYSTEM, attributes::SYSTEM),
            KeyValue::new(semconv::MESSAGING_DESTINATION_NAME, job.queue_name.clone()),
            KeyValue::new(
                semconv::MESSAGING_MESSAGE_ID,
                job.id.clone().unwrap_or_else(|| "unknown".to_owned()),
            ),
            KeyValue::new(attributes::QUEUE_NAME, job.queue_name.clone()),
            KeyValue::new(attributes::JOB_NAME, job.name.clone()),
            KeyValue::new(attributes::JOB_ATTEMPTS, attempt as i64),
            KeyValue::new(attributes::JOB_TIMESTAMP, job.timestamp as i64),
            KeyValue::new(attributes::WORKER_NAME, self.worker.name.clone()),
            KeyValue::new(
                attributes::WORKER_CONCURRENCY,
                self.worker.concurrency as i64,
            ),
            KeyValue::new(
                attributes::WORKER_LOCK_DURATION,
                self.worker.lock_duration_ms as i64,
            ),
        ];
        if let Some(delay) = job.opts.delay_ms {
            span_attributes.push(KeyValue::new(attributes::JOB_DELAY, delay as i64));
        }
        if let Some(renew) = self.worker.lock_renew_time_ms {
            span_attributes.push(KeyValue::new(attributes::WORKER_LOCK_RENEW, renew as i64));
        }
        if let Some(limiter) = &self.worker.rate_limiter {
            span_attributes.push(KeyValue::new(
                attributes::WORKER_RATE_LIMIT_MAX,
                limiter.max as i64,
            ));
            span_attributes.push(KeyValue::new(
                attributes::WORKER_RATE_LIMIT_DURATION,
                limiter.duration_ms as i64,
            ));
            if let Some(group_key) = &limiter.group_key {
                span_attributes.push(KeyValue::new(
                    attributes::WORKER_RATE_LIMIT_GROUP,
                    group_key.clone(),
                ));
            }
        }
        if let Some(repeat_key) = &job.repeat_job_key {
            span_attributes.push(KeyValue::new(
                attributes::JOB_REPEAT_KEY,
                repeat_key.clone(),
            ));
        }
        span_attributes
    }
}

#[async_trait]
impl Processor for TracedProcessor {
    async fn process(&self, job: &mut Job) -> Result<Value, QueueError> {
        let factory = match self
            .instrumentation
            .active(self.target, OpKind::ConsumerProcess)
        {
            Some(factory) => factory,
            None => return self.inner.process(job).await,
        };

        let parent = carrier::extract_context(&Context::new(), &job.opts.headers);
        let attempt = job.attempts_made + 1;
        let span_attributes = self.consumer_attributes(job, attempt);
        let cx = factory.start_with_parent(
            SpanFactory::span_name(
                &job.queue_name,
                Some(&job.name),
                OpKind::ConsumerProcess,
                Some(attempt),
            ),
            SpanKind::Consumer,
            span_attributes,
            &parent,
        );

        let handle = SpanHandle::new(cx.clone());
        let result = self.inner.process(job).with_context(cx).await;

        // The worker library may have stamped completion metadata on the
        // job while the callback ran.
        if let Some(processed_on) = job.processed_on {
            handle.set_attribute(KeyValue::new(
                attributes::JOB_PROCESSED_TIMESTAMP,
                processed_on as i64,
            ));
        }
        if let Some(finished_on) = job.finished_on {
            handle.set_attribute(KeyValue::new(
                attributes::JOB_FINISHED_TIMESTAMP,
                finished_on as i64,
            ));
        }
        if let Some(failed_reason) = &job.failed_reason {
            handle.set_attribute(KeyValue::new(
                attributes::JOB_FAILED_REASON,
                failed_reason.clone(),
            ));
        }

        match &result {
            Ok(_) => handle.end_ok(),
            Err(err) => handle.end_err(err),
        }
        result
    }
}
