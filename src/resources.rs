//! Helpers over the `k8s-openapi` objects the migration touches.
//!
//! Most metadata fields are optional in the API types; the accessors here
//! flatten the ones this tool reads into plain `&str`.

use std::fmt;

use k8s_openapi::{
    api::{
        apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
        core::v1::{PersistentVolume, Pod},
    },
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference},
};
use serde::Deserialize;

pub const STORAGE: &str = "storage";
pub const RECLAIM_RETAIN: &str = "Retain";
pub const READ_WRITE_ONCE: &str = "ReadWriteOnce";
pub const BIND_COMPLETED_ANNOTATION: &str = "pv.kubernetes.io/bind-completed";
pub const PROVISIONED_BY_ANNOTATION: &str = "pv.kubernetes.io/provisioned-by";

pub fn name(meta: &ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

pub fn namespace(meta: &ObjectMeta) -> &str {
    meta.namespace.as_deref().unwrap_or_default()
}

pub fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations.as_ref()?.get(key).map(String::as_str)
}

/// First owner reference, the one the controller manager acts on.
pub fn first_owner(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references.as_ref()?.first()
}

/// `spec.capacity.storage`, verbatim.
pub fn volume_capacity(pv: &PersistentVolume) -> Option<&str> {
    pv.spec
        .as_ref()?
        .capacity
        .as_ref()?
        .get(STORAGE)
        .map(|q| q.0.as_str())
}

/// Claim names are matched case-insensitively.
pub fn mounts_claim(pod: &Pod, claim: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|v| v.persistent_volume_claim.as_ref())
        .any(|c| c.claim_name.eq_ignore_ascii_case(claim))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkloadKind {
    DaemonSet,
    StatefulSet,
    ReplicaSet,
    Deployment,
}

impl WorkloadKind {
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "DaemonSet" => Some(Self::DaemonSet),
            "StatefulSet" => Some(Self::StatefulSet),
            "ReplicaSet" => Some(Self::ReplicaSet),
            "Deployment" => Some(Self::Deployment),
            _ => None,
        }
    }

    /// Resource name as `kubectl` spells it.
    pub fn resource(self) -> &'static str {
        match self {
            Self::DaemonSet => "daemonset",
            Self::StatefulSet => "statefulset",
            Self::ReplicaSet => "replicaset",
            Self::Deployment => "deployment",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DaemonSet => "DaemonSet",
            Self::StatefulSet => "StatefulSet",
            Self::ReplicaSet => "ReplicaSet",
            Self::Deployment => "Deployment",
        };
        f.write_str(s)
    }
}

/// One of the four controller kinds that can own a pod.
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    DaemonSet(DaemonSet),
    StatefulSet(StatefulSet),
    ReplicaSet(ReplicaSet),
    Deployment(Deployment),
}

impl Workload {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Self::DaemonSet(_) => WorkloadKind::DaemonSet,
            Self::StatefulSet(_) => WorkloadKind::StatefulSet,
            Self::ReplicaSet(_) => WorkloadKind::ReplicaSet,
            Self::Deployment(_) => WorkloadKind::Deployment,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::DaemonSet(w) => &w.metadata,
            Self::StatefulSet(w) => &w.metadata,
            Self::ReplicaSet(w) => &w.metadata,
            Self::Deployment(w) => &w.metadata,
        }
    }

    /// `spec.replicas` as stored; daemonsets have none.
    pub fn replicas(&self) -> Option<i32> {
        match self {
            Self::DaemonSet(_) => None,
            Self::StatefulSet(w) => w.spec.as_ref()?.replicas,
            Self::ReplicaSet(w) => w.spec.as_ref()?.replicas,
            Self::Deployment(w) => w.spec.as_ref()?.replicas,
        }
    }
}

/// `kubectl get -o json` list envelope (`kind: List`).
#[derive(Debug, Deserialize)]
pub struct List<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}
