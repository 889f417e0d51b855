//! Span construction and the end-exactly-once guard.

use opentelemetry::{
    global::BoxedTracer,
    trace::{SpanKind, Status, TraceContextExt, Tracer},
    Context, KeyValue,
};

use crate::registry::OpKind;

/// Builds the spans for wrapped operations of one enabled instrumentation
/// period.
pub(crate) struct SpanFactory {
    tracer: BoxedTracer,
}

impl SpanFactory {
    pub(crate) fn new(tracer: BoxedTracer) -> Self {
        SpanFactory { tracer }
    }

    /// Deterministic span name: `"<scope>.<job> <op>"`, with ` #<attempt>`
    /// appended for consumer spans. Batch operations have no single job
    /// name and drop that segment.
    pub(crate) fn span_name(
        scope: &str,
        job: Option<&str>,
        op: OpKind,
        attempt: Option<u32>,
    ) -> String {
        let mut name = match job {
            Some(job) => format!("{}.{} {}", scope, job, op.label()),
            None => format!("{} {}", scope, op.label()),
        };
        if let Some(attempt) = attempt {
            name.push_str(&format!(" #{}", attempt));
        }
        name
    }

    /// Starts a span as a child of `parent` and returns the context that
    /// carries it, the message context the original call runs under.
    pub(crate) fn start_with_parent(
        &self,
        name: String,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
        parent: &Context,
    ) -> Context {
        let span = self
            .tracer
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(&self.tracer, parent);
        parent.with_span(span)
    }
}

/// Ends the span carried by a context exactly once.
///
/// Dropping the handle before [`end_ok`] or [`end_err`] ran closes the span
/// with an error status, so a call the host cancelled mid-flight never
/// leaves its span open.
///
/// [`end_ok`]: SpanHandle::end_ok
/// [`end_err`]: SpanHandle::end_err
pub(crate) struct SpanHandle {
    cx: Context,
    ended: bool,
}

impl SpanHandle {
    pub(crate) fn new(cx: Context) -> Self {
        SpanHandle { cx, ended: false }
    }

    pub(crate) fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    pub(crate) fn end_ok(mut self) {
        self.ended = true;
        self.cx.span().end();
    }

    pub(crate) fn end_err(mut self, err: &dyn std::error::Error) {
        self.ended = true;
        let span = self.cx.span();
        span.record_error(err);
        span.set_status(Status::error(err.to_string()));
        span.end();
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        if !self.ended {
            let span = self.cx.span();
            span.set_status(Status::error("call cancelled before completion"));
            span.end();
        }
    }
}
