use std::{collections::HashSet, fmt, time::Duration};

use anyhow::Result;

use crate::{resources::WorkloadKind, tooling::KubePort};

#[derive(Debug, Clone)]
pub struct RunOpts {
    pub source_class: String,
    pub target_class: String,
    pub cluster_name: String,
    pub delete_migrated: bool,
    pub wait_timeout: Option<Duration>,
}

/// Identity of a workload controller within one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ControllerRef {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
}

impl ControllerRef {
    pub fn new(kind: WorkloadKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ControllerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Restore of a paused controller, postponed to the end of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferred {
    /// Restore the replica count captured before scaling to zero.
    Scale { target: ControllerRef, replicas: i32 },
    /// Drop the pause key from a daemonset's node selector.
    RemoveNodeSelector { target: ControllerRef, key: String },
}

impl Deferred {
    pub fn execute(&self, kube: &dyn KubePort) -> Result<()> {
        match self {
            Deferred::Scale { target, replicas } => {
                kube.scale(target.kind, &target.namespace, &target.name, *replicas)
            }
            Deferred::RemoveNodeSelector { target, key } => {
                kube.set_node_selector(&target.namespace, &target.name, key, None)
            }
        }
    }
}

impl fmt::Display for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferred::Scale { target, replicas } => {
                write!(f, "scale {target} back to {replicas} replicas")
            }
            Deferred::RemoveNodeSelector { target, key } => {
                write!(f, "remove node selector {key} from {target}")
            }
        }
    }
}

/// Mutable state of one migration run, owned by the orchestrator and lent
/// to each step.
#[derive(Debug, Default)]
pub struct RunCtx {
    seen: HashSet<ControllerRef>,
    deferred: Vec<Deferred>,
}

impl RunCtx {
    pub fn is_seen(&self, r: &ControllerRef) -> bool {
        self.seen.contains(r)
    }

    pub fn mark_seen(&mut self, r: ControllerRef) {
        self.seen.insert(r);
    }

    pub fn defer(&mut self, action: Deferred) {
        self.deferred.push(action);
    }

    pub fn pending(&self) -> &[Deferred] {
        &self.deferred
    }

    /// Hands out every queued action exactly once, newest first.
    pub fn drain_lifo(&mut self) -> impl Iterator<Item = Deferred> + '_ {
        self.deferred.drain(..).rev()
    }
}
