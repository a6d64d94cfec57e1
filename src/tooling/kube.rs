use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
    core::v1::{PersistentVolume, PersistentVolumeClaim, Pod},
    storage::v1::StorageClass,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;

use crate::{
    config::Kubectl,
    resources::{List, Workload, WorkloadKind, name, namespace},
    utils::process::{CmdSpec, Runner, StdioSpec},
};

/// Cluster operations the migration needs. Reads that can miss return
/// `Option` so "not found" is never confused with a failed call.
pub trait KubePort: Send + Sync {
    fn list_volumes(&self) -> Result<Vec<PersistentVolume>>;
    fn set_reclaim_policy(&self, volume: &str, policy: &str) -> Result<()>;
    fn create_volume(&self, pv: &PersistentVolume) -> Result<()>;
    /// Removes the volume object only; retained backing storage is untouched.
    fn delete_volume(&self, name: &str) -> Result<()>;

    fn storage_class(&self, name: &str) -> Result<StorageClass>;

    fn get_claim(&self, ns: &str, name: &str) -> Result<Option<PersistentVolumeClaim>>;
    fn create_claim(&self, pvc: &PersistentVolumeClaim) -> Result<()>;
    /// Deletes with foreground propagation and returns without waiting.
    fn delete_claim(&self, ns: &str, name: &str) -> Result<()>;

    fn list_pods(&self, ns: &str) -> Result<Vec<Pod>>;

    fn get_workload(&self, kind: WorkloadKind, ns: &str, name: &str) -> Result<Workload>;
    fn scale(&self, kind: WorkloadKind, ns: &str, name: &str, replicas: i32) -> Result<()>;
    /// Sets (`Some`) or removes (`None`) a key of a daemonset's pod-template node selector.
    fn set_node_selector(
        &self,
        ns: &str,
        daemonset: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()>;
}

type DynRunner = dyn Runner + Send + Sync;

pub struct KubectlCli {
    runner: Arc<DynRunner>,
    bin: String,
    kubeconfig: PathBuf,
    context: Option<String>,
}

impl KubectlCli {
    pub fn new(runner: Arc<DynRunner>, cfg: &Kubectl, kubeconfig: &Path) -> Self {
        Self {
            runner,
            bin: cfg.bin.clone(),
            kubeconfig: kubeconfig.to_path_buf(),
            context: cfg.context.clone(),
        }
    }

    fn kubectl(&self) -> CmdSpec {
        let mut cmd = CmdSpec::new(self.bin.as_str())
            .arg("--kubeconfig")
            .arg(self.kubeconfig.display().to_string());
        if let Some(ref ctx) = self.context {
            cmd = cmd.arg("--context").arg(ctx.as_str());
        }
        cmd.stderr(StdioSpec::Inherit)
    }

    fn read<T: DeserializeOwned>(&self, cmd: CmdSpec) -> Result<Option<T>> {
        let rendered = cmd.render();
        let out = self
            .runner
            .run_capture(&cmd.stdout(StdioSpec::Pipe))
            .with_context(|| format!("run {rendered}"))?;
        if out.trim().is_empty() {
            return Ok(None);
        }
        let v = serde_json::from_str(&out).with_context(|| format!("parse output of {rendered}"))?;
        Ok(Some(v))
    }

    fn read_list<T: DeserializeOwned>(&self, cmd: CmdSpec) -> Result<Vec<T>> {
        Ok(self
            .read::<List<T>>(cmd)?
            .map(|l| l.items)
            .unwrap_or_default())
    }

    fn apply_create<T: Serialize>(&self, obj: &T, what: &str) -> Result<()> {
        let manifest = serde_json::to_vec(obj).with_context(|| format!("serialize {what}"))?;
        let cmd = self.kubectl().args(["create", "-f", "-"]).input(manifest);
        self.runner
            .run(&cmd)
            .with_context(|| format!("kubectl create {what}"))
    }

    fn merge_patch(&self, target: &[&str], patch: serde_json::Value) -> Result<()> {
        let cmd = self
            .kubectl()
            .arg("patch")
            .args(target.iter().copied())
            .args(["--type", "merge", "-p"])
            .arg(patch.to_string());
        self.runner
            .run(&cmd)
            .with_context(|| format!("kubectl patch {}", target.join(" ")))
    }
}

impl KubePort for KubectlCli {
    fn list_volumes(&self) -> Result<Vec<PersistentVolume>> {
        self.read_list(self.kubectl().args(["get", "persistentvolumes", "-o", "json"]))
            .context("list persistent volumes")
    }

    fn set_reclaim_policy(&self, volume: &str, policy: &str) -> Result<()> {
        self.merge_patch(
            &["persistentvolume", volume],
            json!({ "spec": { "persistentVolumeReclaimPolicy": policy } }),
        )
    }

    fn create_volume(&self, pv: &PersistentVolume) -> Result<()> {
        self.apply_create(pv, &format!("persistentvolume/{}", name(&pv.metadata)))
    }

    fn delete_volume(&self, name: &str) -> Result<()> {
        let cmd = self
            .kubectl()
            .args(["delete", "persistentvolume", name, "--wait=false"]);
        self.runner
            .run(&cmd)
            .with_context(|| format!("kubectl delete persistentvolume {name}"))
    }

    fn storage_class(&self, name: &str) -> Result<StorageClass> {
        self.read(
            self.kubectl()
                .args(["get", "storageclass", name, "--ignore-not-found", "-o", "json"]),
        )?
        .with_context(|| format!("storage class {name} not found"))
    }

    fn get_claim(&self, ns: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        self.read(self.kubectl().args([
            "get",
            "persistentvolumeclaim",
            name,
            "-n",
            ns,
            "--ignore-not-found",
            "-o",
            "json",
        ]))
    }

    fn create_claim(&self, pvc: &PersistentVolumeClaim) -> Result<()> {
        self.apply_create(
            pvc,
            &format!(
                "persistentvolumeclaim {}/{}",
                namespace(&pvc.metadata),
                name(&pvc.metadata)
            ),
        )
    }

    fn delete_claim(&self, ns: &str, name: &str) -> Result<()> {
        let cmd = self.kubectl().args([
            "delete",
            "persistentvolumeclaim",
            name,
            "-n",
            ns,
            "--cascade=foreground",
            "--wait=false",
        ]);
        self.runner
            .run(&cmd)
            .with_context(|| format!("kubectl delete persistentvolumeclaim {ns}/{name}"))
    }

    fn list_pods(&self, ns: &str) -> Result<Vec<Pod>> {
        self.read_list(self.kubectl().args(["get", "pods", "-n", ns, "-o", "json"]))
            .with_context(|| format!("list pods in namespace {ns}"))
    }

    fn get_workload(&self, kind: WorkloadKind, ns: &str, name: &str) -> Result<Workload> {
        let cmd = self.kubectl().args([
            "get",
            kind.resource(),
            name,
            "-n",
            ns,
            "--ignore-not-found",
            "-o",
            "json",
        ]);
        let found = match kind {
            WorkloadKind::DaemonSet => self.read::<DaemonSet>(cmd)?.map(Workload::DaemonSet),
            WorkloadKind::StatefulSet => self.read::<StatefulSet>(cmd)?.map(Workload::StatefulSet),
            WorkloadKind::ReplicaSet => self.read::<ReplicaSet>(cmd)?.map(Workload::ReplicaSet),
            WorkloadKind::Deployment => self.read::<Deployment>(cmd)?.map(Workload::Deployment),
        };
        found.with_context(|| format!("{kind} {ns}/{name} not found"))
    }

    fn scale(&self, kind: WorkloadKind, ns: &str, name: &str, replicas: i32) -> Result<()> {
        let cmd = self.kubectl().args([
            "scale".to_string(),
            format!("{}/{name}", kind.resource()),
            "-n".to_string(),
            ns.to_string(),
            format!("--replicas={replicas}"),
        ]);
        self.runner
            .run(&cmd)
            .with_context(|| format!("kubectl scale {kind} {ns}/{name} --replicas={replicas}"))
    }

    fn set_node_selector(
        &self,
        ns: &str,
        daemonset: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        // A null value removes the key under merge-patch semantics.
        let patch = json!({
            "spec": { "template": { "spec": { "nodeSelector": { key: value } } } }
        });
        self.merge_patch(&["daemonset", daemonset, "-n", ns], patch)
    }
}
