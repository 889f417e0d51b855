//! Producer-side propagation: traced wrappers around the submission
//! operations.
//!
//! Each wrapped call starts a producer span, injects the resulting message
//! context into every outgoing job's carrier, runs the original submission
//! inside that context, records the produced identifier(s), and ends the
//! span exactly once, also on failure or cancellation.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::{
    trace::{FutureExt, SpanKind},
    Array, Context, KeyValue, StringValue,
};
use opentelemetry_semantic_conventions::attribute as semconv;
use serde_json::Value;

use crate::attributes;
use crate::carrier;
use crate::client::{FlowProducer, FlowSpec, Job, JobNode, JobOptions, JobSpec, Queue, QueueError};
use crate::instrumentation::Inner;
use crate::registry::{OpKind, TargetId};
use crate::span::{SpanFactory, SpanHandle};

/// A [`Queue`] handle whose submissions are traced while the owning
/// instrumentation is enabled.
pub struct TracedQueue {
    inner: Arc<dyn Queue>,
    target: TargetId,
    instrumentation: Arc<Inner>,
}

impl TracedQueue {
    pub(crate) fn new(inner: Arc<dyn Queue>, target: TargetId, instrumentation: Arc<Inner>) -> Self {
        TracedQueue {
            inner,
            target,
            instrumentation,
        }
    }
}

#[async_trait]
impl Queue for TracedQueue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supported_operations(&self) -> &'static [OpKind] {
        self.inner.supported_operations()
    }

    async fn add(&self, name: &str, payload: Value, mut opts: JobOptions) -> Result<Job, QueueError> {
        let factory = match self.instrumentation.active(self.target, OpKind::ProducerAdd) {
            Some(factory) => factory,
            None => return self.inner.add(name, payload, opts).await,
        };

        let queue_name = self.inner.name().to_owned();
        let mut span_attributes = vec![
            KeyValue::new(semconv::MESSAGING_SYSTEM, attributes::SYSTEM),
            KeyValue::new(semconv::MESSAGING_DESTINATION_NAME, queue_name.clone()),
            KeyValue::new(attributes::QUEUE_NAME, queue_name.clone()),
            KeyValue::new(attributes::JOB_NAME, name.to_owned()),
        ];
        span_attributes.extend(attributes::job_options_attributes(&opts));

        let parent = Context::current();
        let message_cx = factory.start_with_parent(
            SpanFactory::span_name(&queue_name, Some(name), OpKind::ProducerAdd, None),
            SpanKind::Producer,
            span_attributes,
            &parent,
        );
        carrier::inject_context(&message_cx, &mut opts.headers);

        let handle = SpanHandle::new(message_cx.clone());
        let result = self
            .inner
            .add(name, payload, opts)
            .with_context(message_cx)
            .await;
        match &result {
            Ok(job) => {
                handle.set_attribute(KeyValue::new(
                    semconv::MESSAGING_MESSAGE_ID,
                    job.id.clone().unwrap_or_else(|| "unknown".to_owned()),
                ));
                handle.end_ok();
            }
            Err(err) => handle.end_err(err),
        }
        result
    }

    async fn add_bulk(&self, mut specs: Vec<JobSpec>) -> Result<Vec<Job>, QueueError> {
        let factory = match self.instrumentation.active(self.target, OpKind::ProducerAddBulk) {
            Some(factory) => factory,
            None => return self.inner.add_bulk(specs).await,
        };

        let queue_name = self.inner.name().to_owned();
        let span_attributes = vec![
            KeyValue::new(semconv::MESSAGING_SYSTEM, attributes::SYSTEM),
            KeyValue::new(semconv::MESSAGING_DESTINATION_NAME, queue_name.clone()),
            KeyValue::new(semconv::MESSAGING_BATCH_MESSAGE_COUNT, specs.len() as i64),
            KeyValue::new(attributes::QUEUE_NAME, queue_name.clone()),
            KeyValue::new(attributes::JOB_BULK_COUNT, specs.len() as i64),
            KeyValue::new(
                attributes::JOB_BULK_NAMES,
                opentelemetry::Value::Array(Array::String(
                    specs
                        .iter()
                        .map(|spec| StringValue::from(spec.name.clone()))
                        .collect(),
                )),
            ),
        ];

        let parent = Context::current();
        let message_cx = factory.start_with_parent(
            SpanFactory::span_name(&queue_name, None, OpKind::ProducerAddBulk, None),
            SpanKind::Producer,
            span_attributes,
            &parent,
        );
        // Every job of the batch becomes a child of the one batch span:
        // each carrier gets its own serialized copy of the same context.
        for spec in &mut specs {
            carrier::inject_context(&message_cx, &mut spec.opts.headers);
        }

        let handle = SpanHandle::new(message_cx.clone());
        let result = self.inner.add_bulk(specs).with_context(message_cx).await;
        match &result {
            Ok(jobs) => {
                handle.set_attribute(KeyValue::new(
                    semconv::MESSAGING_MESSAGE_ID,
                    opentelemetry::Value::Array(Array::String(
                        jobs.iter().map(|job| job_id_value(job)).collect(),
                    )),
                ));
                handle.end_ok();
            }
            Err(err) => handle.end_err(err),
        }
        result
    }
}

/// A [`FlowProducer`] handle whose submissions are traced while the owning
/// instrumentation is enabled.
pub struct TracedFlowProducer {
    inner: Arc<dyn FlowProducer>,
    target: TargetId,
    instrumentation: Arc<Inner>,
}

impl TracedFlowProducer {
    pub(crate) fn new(
        inner: Arc<dyn FlowProducer>,
        target: TargetId,
        instrumentation: Arc<Inner>,
    ) -> Self {
        TracedFlowProducer {
            inner,
            target,
            instrumentation,
        }
    }
}

#[async_trait]
impl FlowProducer for TracedFlowProducer {
    fn supported_operations(&self) -> &'static [OpKind] {
        self.inner.supported_operations()
    }

    async fn add_flow(&self, mut spec: FlowSpec) -> Result<JobNode, QueueError> {
        let factory = match self.instrumentation.active(self.target, OpKind::FlowAdd) {
            Some(factory) => factory,
            None => return self.inner.add_flow(spec).await,
        };

        let mut span_attributes = vec![
            KeyValue::new(semconv::MESSAGING_SYSTEM, attributes::SYSTEM),
            KeyValue::new(semconv::MESSAGING_DESTINATION_NAME, spec.queue_name.clone()),
            KeyValue::new(attributes::QUEUE_NAME, spec.queue_name.clone()),
            KeyValue::new(attributes::JOB_NAME, spec.name.clone()),
        ];
        if let Some(parent_opts) = &spec.opts.parent {
            span_attributes.push(KeyValue::new(
                attributes::JOB_PARENT_KEY,
                parent_opts.parent_key.clone(),
            ));
            if let Some(wait_key) = &parent_opts.wait_children_key {
                span_attributes.push(KeyValue::new(
                    attributes::JOB_WAIT_CHILDREN_KEY,
                    wait_key.clone(),
                ));
            }
        }
        span_attributes.extend(attributes::job_options_attributes(&spec.opts));

        let parent = Context::current();
        let message_cx = factory.start_with_parent(
            SpanFactory::span_name(&spec.queue_name, Some(&spec.name), OpKind::FlowAdd, None),
            SpanKind::Producer,
            span_attributes,
            &parent,
        );
        // Every node of the flow carries propagation metadata before the
        // single external call goes out.
        inject_tree(&message_cx, &mut spec);

        let handle = SpanHandle::new(message_cx.clone());
        let result = self.inner.add_flow(spec).with_context(message_cx).await;
        match &result {
            Ok(node) => {
                handle.set_attribute(KeyValue::new(
                    semconv::MESSAGING_MESSAGE_ID,
                    node.job.id.clone().unwrap_or_else(|| "unknown".to_owned()),
                ));
                handle.end_ok();
            }
            Err(err) => handle.end_err(err),
        }
        result
    }

    async fn add_bulk(&self, mut specs: Vec<FlowSpec>) -> Result<Vec<JobNode>, QueueError> {
        let factory = match self.instrumentation.active(self.target, OpKind::FlowAddBulk) {
            Some(factory) => factory,
            None => return self.inner.add_bulk(specs).await,
        };

        // Batch-span attribution: the one batch span owns the whole bulk
        // submission and every node is injected with its context.
        let span_attributes = vec![
            KeyValue::new(semconv::MESSAGING_SYSTEM, attributes::SYSTEM),
            KeyValue::new(semconv::MESSAGING_BATCH_MESSAGE_COUNT, specs.len() as i64),
            KeyValue::new(attributes::JOB_BULK_COUNT, specs.len() as i64),
            KeyValue::new(
                attributes::JOB_BULK_NAMES,
                opentelemetry::Value::Array(Array::String(
                    specs
                        .iter()
                        .map(|spec| StringValue::from(spec.name.clone()))
                        .collect(),
                )),
            ),
        ];

        let parent = Context::current();
        let message_cx = factory.start_with_parent(
            SpanFactory::span_name("flow", None, OpKind::FlowAddBulk, None),
            SpanKind::Producer,
            span_attributes,
            &parent,
        );
        for spec in &mut specs {
            inject_tree(&message_cx, spec);
        }

        let handle = SpanHandle::new(message_cx.clone());
        let result = self.inner.add_bulk(specs).with_context(message_cx).await;
        match &result {
            Ok(nodes) => {
                handle.set_attribute(KeyValue::new(
                    semconv::MESSAGING_MESSAGE_ID,
                    opentelemetry::Value::Array(Array::String(
                        nodes.iter().map(|node| job_id_value(&node.job)).collect(),
                    )),
                ));
                handle.end_ok();
            }
            Err(err) => handle.end_err(err),
        }
        result
    }
}

fn inject_tree(cx: &Context, spec: &mut FlowSpec) {
    carrier::inject_context(cx, &mut spec.opts.headers);
    for child in &mut spec.children {
        inject_tree(cx, child);
    }
}

fn job_id_value(job: &Job) -> StringValue {
    job.id.clone().unwrap_or_else(|| "unknown".to_owned()).into()
}
