//! Interception bookkeeping for one instrumentation instance.
//!
//! Instead of patching methods on live objects, collaborator handles
//! register here and the traced wrappers consult the registry on every
//! call. Installing a wrap therefore only flips an entry in this table, and
//! uninstalling restores the exact pass-through behavior of the unwrapped
//! collaborator.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use opentelemetry::{otel_debug, otel_warn};

/// Kind of collaborator object an operation lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetRole {
    Queue,
    FlowProducer,
    Worker,
    Job,
}

/// One interceptable operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    ProducerAdd,
    ProducerAddBulk,
    FlowAdd,
    FlowAddBulk,
    ConsumerProcess,
    ExtendLock,
    Remove,
    Retry,
}

impl OpKind {
    /// Operation label used in span and event names.
    pub fn label(&self) -> &'static str {
        match self {
            OpKind::ProducerAdd => "add",
            OpKind::ProducerAddBulk => "addBulk",
            OpKind::FlowAdd => "addFlow",
            OpKind::FlowAddBulk => "addBulk",
            OpKind::ConsumerProcess => "process",
            OpKind::ExtendLock => "extendLock",
            OpKind::Remove => "remove",
            OpKind::Retry => "retry",
        }
    }

    /// Full operation set for a role. Targets may advertise a subset when
    /// the collaborator version lacks an operation.
    pub fn for_role(role: TargetRole) -> &'static [OpKind] {
        match role {
            TargetRole::Queue => &[OpKind::ProducerAdd, OpKind::ProducerAddBulk],
            TargetRole::FlowProducer => &[OpKind::FlowAdd, OpKind::FlowAddBulk],
            TargetRole::Worker => &[OpKind::ConsumerProcess],
            TargetRole::Job => &[OpKind::ExtendLock, OpKind::Remove, OpKind::Retry],
        }
    }
}

/// Handle for one registered collaborator object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetId(u64);

/// Identifies a wrapped operation on a registered target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperationDescriptor {
    pub target: TargetId,
    pub role: TargetRole,
    pub op: OpKind,
}

struct TargetRecord {
    id: TargetId,
    role: TargetRole,
    supported: &'static [OpKind],
}

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Wrap/unwrap table scoped to one instrumentation instance.
///
/// Wraps are installed in registration order and removed in reverse
/// installation order. Both directions are idempotent. A poisoned lock is
/// treated as "nothing wrapped": tracing silently stops, the collaborator
/// keeps working.
pub(crate) struct InterceptionRegistry {
    targets: Mutex<Vec<TargetRecord>>,
    installed: Mutex<Vec<OperationDescriptor>>,
    active: RwLock<HashSet<(TargetId, OpKind)>>,
}

impl InterceptionRegistry {
    pub(crate) fn new() -> Self {
        InterceptionRegistry {
            targets: Mutex::new(Vec::new()),
            installed: Mutex::new(Vec::new()),
            active: RwLock::new(HashSet::new()),
        }
    }

    /// Records a collaborator object and the operations it exposes.
    pub(crate) fn register(&self, role: TargetRole, supported: &'static [OpKind]) -> TargetId {
        let id = TargetId(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut targets) = self.targets.lock() {
            targets.push(TargetRecord {
                id,
                role,
                supported,
            });
        }
        id
    }

    /// Fast path consulted by the traced wrappers on every call.
    pub(crate) fn is_wrapped(&self, target: TargetId, op: OpKind) -> bool {
        self.active
            .read()
            .map(|active| active.contains(&(target, op)))
            .unwrap_or(false)
    }

    /// Installs wraps for every registered target, in registration order.
    pub(crate) fn install_all(&self) {
        let records: Vec<(TargetId, TargetRole, &'static [OpKind])> = match self.targets.lock() {
            Ok(targets) => targets
                .iter()
                .map(|t| (t.id, t.role, t.supported))
                .collect(),
            Err(_) => return,
        };
        for (id, role, supported) in records {
            self.install(id, role, supported);
        }
    }

    /// Installs wraps for one target, e.g. when it registers while the
    /// instrumentation is already enabled.
    pub(crate) fn install_target(&self, target: TargetId) {
        let record = match self.targets.lock() {
            Ok(targets) => targets
                .iter()
                .find(|t| t.id == target)
                .map(|t| (t.id, t.role, t.supported)),
            Err(_) => return,
        };
        if let Some((id, role, supported)) = record {
            self.install(id, role, supported);
        }
    }

    fn install(&self, id: TargetId, role: TargetRole, supported: &'static [OpKind]) {
        for &op in OpKind::for_role(role) {
            if !supported.contains(&op) {
                // Version mismatch: skip this one operation, keep going.
                otel_warn!(
                    name: "JobQueueInstrumentation.OperationNotFound",
                    role = format!("{:?}", role),
                    operation = op.label(),
                );
                continue;
            }
            let descriptor = OperationDescriptor {
                target: id,
                role,
                op,
            };
            let newly_active = self
                .active
                .write()
                .map(|mut active| active.insert((id, op)))
                .unwrap_or(false);
            // Idempotence guard: an already-wrapped operation is not
            // double-wrapped and not recorded twice.
            if newly_active {
                if let Ok(mut installed) = self.installed.lock() {
                    installed.push(descriptor);
                }
                otel_debug!(
                    name: "JobQueueInstrumentation.OperationWrapped",
                    operation = op.label(),
                );
            }
        }
    }

    /// Removes every installed wrap, in reverse installation order.
    pub(crate) fn uninstall_all(&self) {
        let mut installed = match self.installed.lock() {
            Ok(installed) => installed,
            Err(_) => return,
        };
        while let Some(descriptor) = installed.pop() {
            if let Ok(mut active) = self.active.write() {
                active.remove(&(descriptor.target, descriptor.op));
            }
            otel_debug!(
                name: "JobQueueInstrumentation.OperationUnwrapped",
                operation = descriptor.op.label(),
            );
        }
    }
}
