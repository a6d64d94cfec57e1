//! In-memory cluster used by the migration tests.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{Mutex, MutexGuard},
};

use anyhow::{Result, anyhow, bail};
use k8s_openapi::{
    api::{
        apps::v1::{
            DaemonSet, Deployment, DeploymentSpec, ReplicaSet, ReplicaSetSpec, StatefulSet,
            StatefulSetSpec,
        },
        core::v1::{
            AzureDiskVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeClaim,
            PersistentVolumeClaimSpec, PersistentVolumeClaimStatus,
            PersistentVolumeClaimVolumeSource, PersistentVolumeSpec, Pod, PodSpec, Volume,
            VolumeResourceRequirements,
        },
        storage::v1::StorageClass,
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{ObjectMeta, OwnerReference},
    },
};

use super::KubePort;
use crate::resources::{STORAGE, Workload, WorkloadKind, name, namespace};

/// Scripted answer for the next `get_claim`, consumed before real state.
#[derive(Debug, Clone)]
pub enum ClaimRead {
    Present,
    Error(String),
}

#[derive(Default)]
pub struct State {
    pub volumes: BTreeMap<String, PersistentVolume>,
    pub classes: BTreeMap<String, StorageClass>,
    pub claims: BTreeMap<(String, String), PersistentVolumeClaim>,
    pub pods: Vec<Pod>,
    pub workloads: BTreeMap<(WorkloadKind, String, String), Workload>,
    pub node_selectors: BTreeMap<(String, String), BTreeMap<String, String>>,
    /// Every state change, in order, e.g. `scale Deployment/app/web 0`.
    pub mutations: Vec<String>,
    pub claim_reads: VecDeque<ClaimRead>,
    /// Operation keys that fail, e.g. `create_volume:pv-1-csi`.
    pub failing: BTreeSet<String>,
    pub claim_gets: usize,
}

impl State {
    fn check(&self, key: String) -> Result<()> {
        if self.failing.contains(&key) {
            bail!("injected failure: {key}");
        }
        Ok(())
    }

    pub fn add_volume(&mut self, pv: PersistentVolume) {
        self.volumes.insert(name(&pv.metadata).to_string(), pv);
    }

    pub fn add_claim(&mut self, pvc: PersistentVolumeClaim) {
        let key = (
            namespace(&pvc.metadata).to_string(),
            name(&pvc.metadata).to_string(),
        );
        self.claims.insert(key, pvc);
    }

    pub fn add_class(&mut self, sc: StorageClass) {
        self.classes.insert(name(&sc.metadata).to_string(), sc);
    }

    pub fn add_workload(&mut self, ns: &str, w: Workload) {
        let key = (w.kind(), ns.to_string(), name(w.metadata()).to_string());
        self.workloads.insert(key, w);
    }

    pub fn fail(&mut self, key: &str) {
        self.failing.insert(key.to_string());
    }

    pub fn claim(&self, ns: &str, claim: &str) -> Option<&PersistentVolumeClaim> {
        self.claims.get(&(ns.to_string(), claim.to_string()))
    }

    /// `spec.volumeName` of a stored claim.
    pub fn bound_volume(&self, ns: &str, claim: &str) -> Option<&str> {
        self.claim(ns, claim)?.spec.as_ref()?.volume_name.as_deref()
    }

    pub fn replicas(&self, kind: WorkloadKind, ns: &str, name: &str) -> Option<i32> {
        self.workloads
            .get(&(kind, ns.to_string(), name.to_string()))
            .and_then(Workload::replicas)
    }

    pub fn mutations_matching(&self, prefix: &str) -> Vec<&str> {
        self.mutations
            .iter()
            .map(String::as_str)
            .filter(|m| m.starts_with(prefix))
            .collect()
    }
}

#[derive(Default)]
pub struct FakeKube {
    state: Mutex<State>,
}

impl FakeKube {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

fn set_replicas(w: &mut Workload, replicas: i32) -> Result<()> {
    match w {
        Workload::DaemonSet(_) => bail!("daemonsets have no replicas"),
        Workload::StatefulSet(s) => {
            s.spec.get_or_insert_with(StatefulSetSpec::default).replicas = Some(replicas);
        }
        Workload::ReplicaSet(r) => {
            r.spec.get_or_insert_with(ReplicaSetSpec::default).replicas = Some(replicas);
        }
        Workload::Deployment(d) => {
            d.spec.get_or_insert_with(DeploymentSpec::default).replicas = Some(replicas);
        }
    }
    Ok(())
}

impl KubePort for FakeKube {
    fn list_volumes(&self) -> Result<Vec<PersistentVolume>> {
        let s = self.state();
        s.check("list_volumes".into())?;
        Ok(s.volumes.values().cloned().collect())
    }

    fn set_reclaim_policy(&self, volume: &str, policy: &str) -> Result<()> {
        let mut s = self.state();
        s.check(format!("set_reclaim_policy:{volume}"))?;
        let pv = s
            .volumes
            .get_mut(volume)
            .ok_or_else(|| anyhow!("persistentvolume {volume} not found"))?;
        pv.spec
            .get_or_insert_with(PersistentVolumeSpec::default)
            .persistent_volume_reclaim_policy = Some(policy.to_string());
        s.mutations.push(format!("reclaim {volume} {policy}"));
        Ok(())
    }

    fn create_volume(&self, pv: &PersistentVolume) -> Result<()> {
        let mut s = self.state();
        let pv_name = name(&pv.metadata).to_string();
        s.check(format!("create_volume:{pv_name}"))?;
        if s.volumes.contains_key(&pv_name) {
            bail!("persistentvolume {pv_name} already exists");
        }
        s.mutations.push(format!("create pv/{pv_name}"));
        s.volumes.insert(pv_name, pv.clone());
        Ok(())
    }

    fn delete_volume(&self, name: &str) -> Result<()> {
        let mut s = self.state();
        s.check(format!("delete_volume:{name}"))?;
        s.volumes.remove(name);
        s.mutations.push(format!("delete pv/{name}"));
        Ok(())
    }

    fn storage_class(&self, name: &str) -> Result<StorageClass> {
        self.state()
            .classes
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("storage class {name} not found"))
    }

    fn get_claim(&self, ns: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        let mut s = self.state();
        s.claim_gets += 1;
        match s.claim_reads.pop_front() {
            Some(ClaimRead::Present) => {
                return Ok(Some(PersistentVolumeClaim {
                    metadata: meta(Some(ns), name),
                    ..Default::default()
                }));
            }
            Some(ClaimRead::Error(e)) => bail!(e),
            None => {}
        }
        Ok(s.claim(ns, name).cloned())
    }

    fn create_claim(&self, pvc: &PersistentVolumeClaim) -> Result<()> {
        let mut s = self.state();
        let (ns, claim) = (
            namespace(&pvc.metadata).to_string(),
            name(&pvc.metadata).to_string(),
        );
        s.check(format!("create_claim:{ns}/{claim}"))?;
        if s.claim(&ns, &claim).is_some() {
            bail!("persistentvolumeclaim {ns}/{claim} already exists");
        }
        s.mutations.push(format!("create pvc/{ns}/{claim}"));
        s.claims.insert((ns, claim), pvc.clone());
        Ok(())
    }

    fn delete_claim(&self, ns: &str, name: &str) -> Result<()> {
        let mut s = self.state();
        s.check(format!("delete_claim:{ns}/{name}"))?;
        s.claims.remove(&(ns.to_string(), name.to_string()));
        s.mutations.push(format!("delete pvc/{ns}/{name}"));
        Ok(())
    }

    fn list_pods(&self, ns: &str) -> Result<Vec<Pod>> {
        let s = self.state();
        s.check(format!("list_pods:{ns}"))?;
        Ok(s.pods
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(ns))
            .cloned()
            .collect())
    }

    fn get_workload(&self, kind: WorkloadKind, ns: &str, name: &str) -> Result<Workload> {
        let s = self.state();
        s.check(format!("get_workload:{kind}/{ns}/{name}"))?;
        s.workloads
            .get(&(kind, ns.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("{kind} {ns}/{name} not found"))
    }

    fn scale(&self, kind: WorkloadKind, ns: &str, name: &str, replicas: i32) -> Result<()> {
        let mut s = self.state();
        s.check(format!("scale:{kind}/{ns}/{name}"))?;
        let w = s
            .workloads
            .get_mut(&(kind, ns.to_string(), name.to_string()))
            .ok_or_else(|| anyhow!("{kind} {ns}/{name} not found"))?;
        set_replicas(w, replicas)?;
        s.mutations.push(format!("scale {kind}/{ns}/{name} {replicas}"));
        Ok(())
    }

    fn set_node_selector(
        &self,
        ns: &str,
        daemonset: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let mut s = self.state();
        s.check(format!("set_node_selector:{ns}/{daemonset}"))?;
        let sel = s
            .node_selectors
            .entry((ns.to_string(), daemonset.to_string()))
            .or_default();
        match value {
            Some(v) => {
                sel.insert(key.to_string(), v.to_string());
            }
            None => {
                sel.remove(key);
            }
        }
        s.mutations.push(format!(
            "selector DaemonSet/{ns}/{daemonset} {key}={}",
            value.unwrap_or("-")
        ));
        Ok(())
    }
}

fn meta(ns: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: ns.map(str::to_string),
        ..Default::default()
    }
}

fn owned_by(meta: &mut ObjectMeta, owner: Option<(&str, &str)>) {
    if let Some((kind, owner_name)) = owner {
        meta.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".into(),
            kind: kind.into(),
            name: owner_name.into(),
            uid: format!("uid-{owner_name}"),
            ..Default::default()
        }]);
    }
}

fn storage(capacity: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([(STORAGE.to_string(), Quantity(capacity.to_string()))])
}

pub fn azure_pv(
    name: &str,
    class: &str,
    capacity: &str,
    disk_uri: &str,
    claim: (&str, &str),
    policy: &str,
) -> PersistentVolume {
    let mut metadata = meta(None, name);
    metadata.annotations = Some(BTreeMap::from([(
        "volumehelper.VolumeDynamicallyCreatedByKey".to_string(),
        "azure-disk-dynamic-provisioner".to_string(),
    )]));
    PersistentVolume {
        metadata,
        spec: Some(PersistentVolumeSpec {
            capacity: Some(storage(capacity)),
            access_modes: Some(vec!["ReadWriteOnce".into()]),
            persistent_volume_reclaim_policy: Some(policy.into()),
            storage_class_name: Some(class.into()),
            claim_ref: Some(ObjectReference {
                kind: Some("PersistentVolumeClaim".into()),
                api_version: Some("v1".into()),
                namespace: Some(claim.0.into()),
                name: Some(claim.1.into()),
                ..Default::default()
            }),
            azure_disk: Some(AzureDiskVolumeSource {
                disk_name: format!("disk-{name}"),
                disk_uri: disk_uri.into(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn bound_claim(
    ns: &str,
    name: &str,
    volume: &str,
    class: &str,
    capacity: &str,
) -> PersistentVolumeClaim {
    let mut metadata = meta(Some(ns), name);
    metadata.labels = Some(BTreeMap::from([("app".to_string(), "web".to_string())]));
    metadata.annotations = Some(BTreeMap::from([
        ("pv.kubernetes.io/bind-completed".to_string(), "yes".to_string()),
        (
            "volume.beta.kubernetes.io/storage-provisioner".to_string(),
            "kubernetes.io/azure-disk".to_string(),
        ),
    ]));
    metadata.resource_version = Some("4711".into());
    metadata.uid = Some(format!("uid-{name}"));
    PersistentVolumeClaim {
        metadata,
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".into()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(storage(capacity)),
                ..Default::default()
            }),
            storage_class_name: Some(class.into()),
            volume_name: Some(volume.into()),
            ..Default::default()
        }),
        status: Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".into()),
            ..Default::default()
        }),
    }
}

pub fn pod(ns: &str, name: &str, claims: &[&str], owner: Option<(&str, &str)>) -> Pod {
    let mut metadata = meta(Some(ns), name);
    owned_by(&mut metadata, owner);
    let volumes = claims
        .iter()
        .map(|c| Volume {
            name: format!("vol-{c}"),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: (*c).into(),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();
    Pod {
        metadata,
        spec: Some(PodSpec {
            volumes: Some(volumes),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn workload(
    kind: WorkloadKind,
    name: &str,
    replicas: Option<i32>,
    owner: Option<(&str, &str)>,
) -> Workload {
    let mut metadata = meta(None, name);
    owned_by(&mut metadata, owner);
    match kind {
        WorkloadKind::DaemonSet => Workload::DaemonSet(DaemonSet {
            metadata,
            ..Default::default()
        }),
        WorkloadKind::StatefulSet => Workload::StatefulSet(StatefulSet {
            metadata,
            spec: Some(StatefulSetSpec {
                replicas,
                ..Default::default()
            }),
            ..Default::default()
        }),
        WorkloadKind::ReplicaSet => Workload::ReplicaSet(ReplicaSet {
            metadata,
            spec: Some(ReplicaSetSpec {
                replicas,
                ..Default::default()
            }),
            ..Default::default()
        }),
        WorkloadKind::Deployment => Workload::Deployment(Deployment {
            metadata,
            spec: Some(DeploymentSpec {
                replicas,
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

pub fn storage_class(name: &str, params: &[(&str, &str)]) -> StorageClass {
    StorageClass {
        metadata: meta(None, name),
        provisioner: "disk.csi.azure.com".into(),
        parameters: Some(
            params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}
