//! Quiescing the workloads that mount a claim.
//!
//! Each pod mounting the claim is traced to its controller through the first
//! owner reference. A ReplicaSet that is itself owned (normally by a
//! Deployment) is unwrapped one more level so the owner is scaled instead.
//! Every pause queues the matching restore on the [`RunCtx`]; restores run
//! once, at the end of the whole batch.

use anyhow::{Context, Result, anyhow, bail};
use k8s_openapi::{api::core::v1::Pod, apimachinery::pkg::apis::meta::v1::OwnerReference};
use tracing as log;

use super::types::{ControllerRef, Deferred, RunCtx};
use crate::{
    resources::{WorkloadKind, first_owner, mounts_claim, name},
    tooling::KubePort,
};

/// Pod owner plus at most one more hop (ReplicaSet to its owner).
const MAX_OWNER_DEPTH: usize = 2;

/// Node-selector entry that keeps a DaemonSet from scheduling new pods.
#[derive(Debug, Clone, Copy)]
pub struct PauseMark<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

/// Pauses every controller whose pods mount `ns/claim`.
///
/// Only listing the pods can fail the call; problems with a single
/// controller are logged and the remaining ones are still handled.
pub fn pause_claim_consumers(
    kube: &dyn KubePort,
    run: &mut RunCtx,
    mark: PauseMark<'_>,
    ns: &str,
    claim: &str,
) -> Result<()> {
    let pods = kube
        .list_pods(ns)
        .with_context(|| format!("list pods in namespace {ns}"))?;

    for pod in pods.iter().filter(|p| mounts_claim(p, claim)) {
        let owner = match pod_owner(pod, ns) {
            Ok(o) => o,
            Err(e) => {
                log::error!("[pause] {e:#}");
                continue;
            }
        };
        if run.is_seen(&owner) {
            log::debug!("[pause] {owner} already handled");
            continue;
        }
        if let Err(e) = pause_owner(kube, run, mark, &owner) {
            log::error!("[pause] {owner}: {e:#}");
        }
    }
    Ok(())
}

fn pod_owner(pod: &Pod, ns: &str) -> Result<ControllerRef> {
    let pod_name = name(&pod.metadata);
    let Some(owner) = first_owner(&pod.metadata) else {
        bail!("pod {ns}/{pod_name} has no owner references; not pausing unmanaged pods");
    };
    let kind = owner_kind(owner).with_context(|| format!("pod {ns}/{pod_name}"))?;
    Ok(ControllerRef::new(kind, ns, &owner.name))
}

fn owner_kind(owner: &OwnerReference) -> Result<WorkloadKind> {
    if owner.kind.is_empty() || owner.name.is_empty() {
        bail!("owner reference with empty kind or name");
    }
    WorkloadKind::from_kind(&owner.kind)
        .ok_or_else(|| anyhow!("owned by unsupported kind {}", owner.kind))
}

fn pause_owner(
    kube: &dyn KubePort,
    run: &mut RunCtx,
    mark: PauseMark<'_>,
    owner: &ControllerRef,
) -> Result<()> {
    let target = resolve_target(kube, owner)?;
    if target != *owner && run.is_seen(&target) {
        log::debug!("[pause] {target} (via {owner}) already handled");
        run.mark_seen(owner.clone());
        return Ok(());
    }

    let restore = pause(kube, mark, &target)?;
    log::info!("[pause] {}", describe_pause(&target, &restore));
    run.defer(restore);

    run.mark_seen(owner.clone());
    run.mark_seen(target);
    Ok(())
}

/// Follows owner references from the pod's controller to the object that
/// should actually be paused.
fn resolve_target(kube: &dyn KubePort, start: &ControllerRef) -> Result<ControllerRef> {
    let mut current = start.clone();
    for _ in 1..MAX_OWNER_DEPTH {
        if current.kind != WorkloadKind::ReplicaSet {
            break;
        }
        let rs = kube
            .get_workload(current.kind, &current.namespace, &current.name)
            .with_context(|| format!("get {current}"))?;
        let Some(owner) = first_owner(rs.metadata()) else {
            break;
        };
        let kind = owner_kind(owner).with_context(|| current.to_string())?;
        current = ControllerRef::new(kind, &current.namespace, &owner.name);
    }
    Ok(current)
}

fn pause(kube: &dyn KubePort, mark: PauseMark<'_>, target: &ControllerRef) -> Result<Deferred> {
    let ControllerRef {
        kind,
        namespace: ns,
        name,
    } = target;

    if *kind == WorkloadKind::DaemonSet {
        kube.set_node_selector(ns, name, mark.key, Some(mark.value))
            .with_context(|| format!("update {target}"))?;
        return Ok(Deferred::RemoveNodeSelector {
            target: target.clone(),
            key: mark.key.to_string(),
        });
    }

    let workload = kube
        .get_workload(*kind, ns, name)
        .with_context(|| format!("get {target}"))?;
    // An unset replica count means the API default of one.
    let replicas = workload.replicas().unwrap_or(1);
    kube.scale(*kind, ns, name, 0)
        .with_context(|| format!("scale down {target}"))?;
    Ok(Deferred::Scale {
        target: target.clone(),
        replicas,
    })
}

fn describe_pause(target: &ControllerRef, restore: &Deferred) -> String {
    match restore {
        Deferred::Scale { replicas, .. } => {
            format!("scaled {target} to 0 replicas (was {replicas})")
        }
        Deferred::RemoveNodeSelector { key, .. } => {
            format!("blocked scheduling of {target} with node selector {key}")
        }
    }
}
