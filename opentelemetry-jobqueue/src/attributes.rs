//! Span attribute names emitted by this crate, and the mapper that turns
//! nested configuration into flat attributes.
//!
//! Everything job-queue specific lives under the `messaging.jobqueue.`
//! prefix, disjoint from the generic `messaging.*` names defined by the
//! semantic conventions.

use opentelemetry::{Array, KeyValue, StringValue};
use serde_json::Value;

use crate::client::JobOptions;

/// Value reported as `messaging.system`.
pub const SYSTEM: &str = "jobqueue";

pub const JOB_NAME: &str = "messaging.jobqueue.job.name";
pub const JOB_ATTEMPTS: &str = "messaging.jobqueue.job.attempts";
pub const JOB_DELAY: &str = "messaging.jobqueue.job.delay";
pub const JOB_TIMESTAMP: &str = "messaging.jobqueue.job.timestamp";
pub const JOB_FAILED_REASON: &str = "messaging.jobqueue.job.failedReason";
pub const JOB_FINISHED_TIMESTAMP: &str = "messaging.jobqueue.job.finishedOn";
pub const JOB_PROCESSED_TIMESTAMP: &str = "messaging.jobqueue.job.processedOn";
/// Prefix for flattened job options, e.g. `messaging.jobqueue.job.opts.attempts`.
pub const JOB_OPTS: &str = "messaging.jobqueue.job.opts";
pub const JOB_REPEAT_KEY: &str = "messaging.jobqueue.job.repeatJobKey";
pub const JOB_PARENT_KEY: &str = "messaging.jobqueue.job.parentOpts.parentKey";
pub const JOB_WAIT_CHILDREN_KEY: &str = "messaging.jobqueue.job.parentOpts.waitChildrenKey";
pub const JOB_BULK_NAMES: &str = "messaging.jobqueue.job.bulk.names";
pub const JOB_BULK_COUNT: &str = "messaging.jobqueue.job.bulk.count";

pub const QUEUE_NAME: &str = "messaging.jobqueue.queue.name";

pub const WORKER_NAME: &str = "messaging.jobqueue.worker.name";
pub const WORKER_CONCURRENCY: &str = "messaging.jobqueue.worker.concurrency";
pub const WORKER_LOCK_DURATION: &str = "messaging.jobqueue.worker.lockDuration";
pub const WORKER_LOCK_RENEW: &str = "messaging.jobqueue.worker.lockRenewTime";
pub const WORKER_RATE_LIMIT_MAX: &str = "messaging.jobqueue.worker.rateLimiter.max";
pub const WORKER_RATE_LIMIT_DURATION: &str = "messaging.jobqueue.worker.rateLimiter.duration";
pub const WORKER_RATE_LIMIT_GROUP: &str = "messaging.jobqueue.worker.rateLimiter.groupKey";

/// Flattens a nested configuration value into dotted span attributes.
///
/// Objects recurse into `prefix.field` keys; scalars and arrays are leaves
/// and are kept as-is. A JSON `null` is kept (as the string `"null"`) since
/// explicit null configuration is distinct from an absent field, which
/// simply produces no attribute. Every reachable leaf is represented.
pub fn flatten_attributes(prefix: &str, value: &Value) -> Vec<KeyValue> {
    let mut attributes = Vec::new();
    flatten_into(prefix, value, &mut attributes);
    attributes
}

fn flatten_into(key: &str, value: &Value, out: &mut Vec<KeyValue>) {
    match value {
        Value::Object(fields) => {
            for (field, child) in fields {
                flatten_into(&format!("{}.{}", key, field), child, out);
            }
        }
        Value::Null => out.push(KeyValue::new(key.to_owned(), "null")),
        Value::Bool(b) => out.push(KeyValue::new(key.to_owned(), *b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push(KeyValue::new(key.to_owned(), i));
            } else if let Some(f) = n.as_f64() {
                out.push(KeyValue::new(key.to_owned(), f));
            } else {
                out.push(KeyValue::new(key.to_owned(), n.to_string()));
            }
        }
        Value::String(s) => out.push(KeyValue::new(key.to_owned(), s.clone())),
        Value::Array(items) => out.push(KeyValue::new(key.to_owned(), array_value(items))),
    }
}

fn array_value(items: &[Value]) -> opentelemetry::Value {
    if items.iter().all(Value::is_boolean) {
        opentelemetry::Value::Array(Array::Bool(
            items.iter().filter_map(Value::as_bool).collect(),
        ))
    } else if items.iter().all(Value::is_i64) {
        opentelemetry::Value::Array(Array::I64(
            items.iter().filter_map(Value::as_i64).collect(),
        ))
    } else if items.iter().all(Value::is_number) {
        opentelemetry::Value::Array(Array::F64(
            items.iter().filter_map(Value::as_f64).collect(),
        ))
    } else {
        opentelemetry::Value::Array(Array::String(
            items.iter().map(string_element).collect(),
        ))
    }
}

fn string_element(value: &Value) -> StringValue {
    match value {
        Value::String(s) => s.clone().into(),
        other => other.to_string().into(),
    }
}

/// Flattens job options under [`JOB_OPTS`]. The carrier headers are
/// excluded; they already travel on the wire.
pub(crate) fn job_options_attributes(opts: &JobOptions) -> Vec<KeyValue> {
    match serde_json::to_value(opts) {
        Ok(Value::Object(mut fields)) => {
            fields.remove("headers");
            flatten_attributes(JOB_OPTS, &Value::Object(fields))
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a opentelemetry::Value> {
        attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }

    #[test]
    fn flattens_nested_objects() {
        let value = json!({
            "attempts": 3,
            "backoff": { "type": "exponential", "delay": 250.5 },
            "removeOnComplete": true,
        });
        let attributes = flatten_attributes("job.opts", &value);

        assert_eq!(
            lookup(&attributes, "job.opts.attempts"),
            Some(&opentelemetry::Value::I64(3))
        );
        assert_eq!(
            lookup(&attributes, "job.opts.backoff.type"),
            Some(&opentelemetry::Value::String("exponential".into()))
        );
        assert_eq!(
            lookup(&attributes, "job.opts.backoff.delay"),
            Some(&opentelemetry::Value::F64(250.5))
        );
        assert_eq!(
            lookup(&attributes, "job.opts.removeOnComplete"),
            Some(&opentelemetry::Value::Bool(true))
        );
    }

    #[test]
    fn keeps_null_and_arrays() {
        let value = json!({
            "group": null,
            "stages": ["fetch", "transform"],
            "weights": [1, 2, 3],
        });
        let attributes = flatten_attributes("cfg", &value);

        assert_eq!(
            lookup(&attributes, "cfg.group"),
            Some(&opentelemetry::Value::String("null".into()))
        );
        assert_eq!(
            lookup(&attributes, "cfg.stages"),
            Some(&opentelemetry::Value::Array(Array::String(vec![
                "fetch".into(),
                "transform".into(),
            ])))
        );
        assert_eq!(
            lookup(&attributes, "cfg.weights"),
            Some(&opentelemetry::Value::Array(Array::I64(vec![1, 2, 3])))
        );
    }

    #[test]
    fn mixed_arrays_become_strings() {
        let value = json!({ "mixed": [1, "two", true] });
        let attributes = flatten_attributes("cfg", &value);

        assert_eq!(
            lookup(&attributes, "cfg.mixed"),
            Some(&opentelemetry::Value::Array(Array::String(vec![
                "1".into(),
                "two".into(),
                "true".into(),
            ])))
        );
    }

    #[test]
    fn job_options_skip_absent_fields_and_headers() {
        let mut opts = JobOptions {
            attempts: Some(5),
            ..JobOptions::default()
        };
        opts.headers
            .insert("traceparent".to_owned(), "00-aa-bb-01".to_owned());

        let attributes = job_options_attributes(&opts);

        assert_eq!(
            lookup(&attributes, "messaging.jobqueue.job.opts.attempts"),
            Some(&opentelemetry::Value::I64(5))
        );
        assert!(lookup(&attributes, "messaging.jobqueue.job.opts.delay_ms").is_none());
        assert!(attributes
            .iter()
            .all(|kv| !kv.key.as_str().contains("headers")));
    }
}
