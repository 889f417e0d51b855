//! Instrumentation instance: configuration, enable/disable lifecycle, and
//! registration of collaborator handles.

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use opentelemetry::{global, otel_debug, trace::TracerProvider as _, InstrumentationScope};

use crate::client::{FlowProducer, JobOps, Processor, Queue, WorkerOptions};
use crate::consumer::TracedProcessor;
use crate::events::TracedJobOps;
use crate::producer::{TracedFlowProducer, TracedQueue};
use crate::registry::{InterceptionRegistry, OpKind, TargetId, TargetRole};
use crate::span::SpanFactory;

static SCOPE: Lazy<InstrumentationScope> = Lazy::new(|| {
    InstrumentationScope::builder("opentelemetry-jobqueue")
        .with_version(env!("CARGO_PKG_VERSION"))
        .build()
});

/// Construction-time configuration.
///
/// The only semantic knob is whether the instance starts enabled.
#[derive(Clone, Debug)]
pub struct InstrumentationConfig {
    enabled: bool,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        InstrumentationConfig { enabled: true }
    }
}

impl InstrumentationConfig {
    pub fn new() -> Self {
        InstrumentationConfig::default()
    }

    /// Whether the instance starts enabled. Defaults to `true`.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

struct LifecycleState {
    enabled: bool,
    factory: Option<Arc<SpanFactory>>,
}

/// State shared between the instrumentation handle and its traced wrappers.
pub(crate) struct Inner {
    registry: InterceptionRegistry,
    state: RwLock<LifecycleState>,
}

impl Inner {
    /// Span factory for a wrapped operation, or `None` when the call must
    /// pass through untouched.
    pub(crate) fn active(&self, target: TargetId, op: OpKind) -> Option<Arc<SpanFactory>> {
        if !self.registry.is_wrapped(target, op) {
            return None;
        }
        self.state
            .read()
            .ok()
            .and_then(|state| state.factory.clone())
    }
}

/// OpenTelemetry tracing instrumentation for an asynchronous job-queue
/// library.
///
/// One instance owns one interception table; there is no process-wide
/// singleton. Collaborator handles are registered through the
/// `instrument_*` methods, which return traced wrappers to be used in place
/// of the originals. [`enable`](Self::enable) installs the wraps,
/// [`disable`](Self::disable) reverses them; both are idempotent. Dropping
/// the instance disables it.
pub struct JobQueueInstrumentation {
    inner: Arc<Inner>,
}

impl JobQueueInstrumentation {
    pub fn new(config: InstrumentationConfig) -> Self {
        let instrumentation = JobQueueInstrumentation {
            inner: Arc::new(Inner {
                registry: InterceptionRegistry::new(),
                state: RwLock::new(LifecycleState {
                    enabled: false,
                    factory: None,
                }),
            }),
        };
        if config.enabled {
            instrumentation.enable();
        }
        instrumentation
    }

    /// Installs every registered wrap and begins emitting spans. A no-op on
    /// an already enabled instance.
    pub fn enable(&self) {
        {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if state.enabled {
                return;
            }
            state.enabled = true;
            // Resolved per enabled period so a tracer provider installed
            // since construction is picked up.
            state.factory = Some(Arc::new(SpanFactory::new(
                global::tracer_provider().tracer_with_scope(SCOPE.clone()),
            )));
        }
        self.inner.registry.install_all();
        otel_debug!(name: "JobQueueInstrumentation.Enabled");
    }

    /// Unwraps every installed operation in reverse order of wrapping.
    /// While disabled, wrapped calls behave exactly like the unwrapped
    /// collaborator and zero spans are produced. A no-op on a disabled
    /// instance.
    pub fn disable(&self) {
        {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !state.enabled {
                return;
            }
            state.enabled = false;
            state.factory = None;
        }
        self.inner.registry.uninstall_all();
        otel_debug!(name: "JobQueueInstrumentation.Disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.inner
            .state
            .read()
            .map(|state| state.enabled)
            .unwrap_or(false)
    }

    /// Wraps a queue producer. Submissions through the returned handle are
    /// traced while the instrumentation is enabled.
    pub fn instrument_queue(&self, queue: Arc<dyn Queue>) -> TracedQueue {
        let target = self.register(TargetRole::Queue, queue.supported_operations());
        TracedQueue::new(queue, target, Arc::clone(&self.inner))
    }

    /// Wraps a flow producer.
    pub fn instrument_flow_producer(&self, producer: Arc<dyn FlowProducer>) -> TracedFlowProducer {
        let target = self.register(TargetRole::FlowProducer, producer.supported_operations());
        TracedFlowProducer::new(producer, target, Arc::clone(&self.inner))
    }

    /// Wraps the processing entry point of one worker.
    pub fn instrument_processor(
        &self,
        worker: WorkerOptions,
        processor: Arc<dyn Processor>,
    ) -> TracedProcessor {
        let target = self.register(TargetRole::Worker, OpKind::for_role(TargetRole::Worker));
        TracedProcessor::new(processor, worker, target, Arc::clone(&self.inner))
    }

    /// Wraps the per-job lifecycle operations (lock renewal, removal,
    /// retry). These record events on the ambient consumer span; they never
    /// open spans of their own.
    pub fn instrument_job_ops(&self, ops: Arc<dyn JobOps>) -> TracedJobOps {
        let target = self.register(TargetRole::Job, ops.supported_operations());
        TracedJobOps::new(ops, target, Arc::clone(&self.inner))
    }

    fn register(&self, role: TargetRole, supported: &'static [OpKind]) -> TargetId {
        let target = self.inner.registry.register(role, supported);
        if self.is_enabled() {
            self.inner.registry.install_target(target);
        }
        target
    }
}

impl Drop for JobQueueInstrumentation {
    fn drop(&mut self) {
        self.disable();
    }
}
