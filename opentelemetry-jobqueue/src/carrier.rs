//! Trace context transport through job metadata.
//!
//! The carrier is the `headers` map of [`JobOptions`]; it is the only
//! channel a context travels through between producer and consumer. The
//! wire format is whatever the globally configured [`TextMapPropagator`]
//! writes, so this module never parses propagation fields itself.
//!
//! [`JobOptions`]: crate::client::JobOptions
//! [`TextMapPropagator`]: opentelemetry::propagation::TextMapPropagator

use opentelemetry::{global, Context};

use crate::client::JobHeaders;

/// Writes the trace context of `cx` into the carrier. Keys already present
/// for other purposes are preserved.
pub fn inject_context(cx: &Context, headers: &mut JobHeaders) {
    global::get_text_map_propagator(|propagator| propagator.inject_context(cx, headers));
}

/// Reads a propagated parent out of the carrier.
///
/// Absent or malformed propagation fields leave `fallback` in effect, so a
/// job enqueued before instrumentation was enabled still processes under a
/// fresh root.
pub fn extract_context(fallback: &Context, headers: &JobHeaders) -> Context {
    global::get_text_map_propagator(|propagator| {
        propagator.extract_with_context(fallback, headers)
    })
}
