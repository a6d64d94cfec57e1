use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use serde::Serialize;
use tracing as log;

use crate::{
    config::VolumeManifest,
    resources::{name, namespace},
    utils::fsx::{ensure_dir, write_file},
};

/// Per-cluster directory holding the manifests written during a run.
#[derive(Debug)]
pub struct AuditDir {
    root: PathBuf,
    volume_manifest: VolumeManifest,
}

impl AuditDir {
    pub fn create(root: impl Into<PathBuf>, volume_manifest: VolumeManifest) -> Result<Self> {
        let root = root.into();
        ensure_dir(&root).with_context(|| format!("create audit dir {}", root.display()))?;
        Ok(Self {
            root,
            volume_manifest,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<old>.json`; see [`VolumeManifest`] for what it contains.
    pub fn write_volume(&self, old_name: &str, new_volume: &PersistentVolume) -> Result<PathBuf> {
        let path = self.root.join(format!("{old_name}.json"));
        log::info!("[migrate] saving new PV manifest: {}", path.display());
        match self.volume_manifest {
            VolumeManifest::Name => self.write_json(&path, &old_name)?,
            VolumeManifest::Full => self.write_json(&path, new_volume)?,
        }
        Ok(path)
    }

    pub fn write_original_claim(&self, pvc: &PersistentVolumeClaim) -> Result<PathBuf> {
        let path = self.claim_path("original-pvc", pvc);
        log::info!("[migrate] saving existing PVC manifest: {}", path.display());
        self.write_json(&path, pvc)?;
        Ok(path)
    }

    pub fn write_new_claim(&self, pvc: &PersistentVolumeClaim) -> Result<PathBuf> {
        let path = self.claim_path("new-pvc", pvc);
        log::info!("[migrate] saving new PVC manifest: {}", path.display());
        self.write_json(&path, pvc)?;
        Ok(path)
    }

    fn claim_path(&self, prefix: &str, pvc: &PersistentVolumeClaim) -> PathBuf {
        self.root.join(format!(
            "{prefix}.{}.{}.json",
            name(&pvc.metadata),
            namespace(&pvc.metadata)
        ))
    }

    fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serialize {}", path.display()))?;
        write_file(path, &bytes)
    }
}
