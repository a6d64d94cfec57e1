use std::collections::BTreeMap;

use anyhow::{Result, bail};
use tracing as log;

use k8s_openapi::{
    api::{
        core::v1::{
            CSIPersistentVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeClaim,
            PersistentVolumeClaimSpec, PersistentVolumeSpec, VolumeResourceRequirements,
        },
        storage::v1::StorageClass,
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::ObjectMeta},
};

use super::discover::Candidate;
use crate::{
    config::Config,
    resources::{
        BIND_COMPLETED_ANNOTATION, PROVISIONED_BY_ANNOTATION, READ_WRITE_ONCE, STORAGE, name,
    },
};

const ATTR_PV_NAME: &str = "csi.storage.k8s.io/pv/name";
const ATTR_PVC_NAME: &str = "csi.storage.k8s.io/pvc/name";
const ATTR_PVC_NAMESPACE: &str = "csi.storage.k8s.io/pvc/namespace";
const ATTR_REQUESTED_SIZE: &str = "requestedsizegib";

/// Everything about the destination that is fixed for the whole run.
#[derive(Debug, Clone)]
pub struct Target {
    pub class: String,
    pub driver: String,
    pub sku_key: String,
    pub sku: String,
    pub suffix: String,
}

impl Target {
    /// Resolves the SKU from the target class; an empty or missing value is fatal.
    pub fn resolve(cfg: &Config, class: &StorageClass) -> Result<Self> {
        let key = &cfg.backend.sku_parameter;
        let class_name = name(&class.metadata);
        let sku = class
            .parameters
            .as_ref()
            .and_then(|p| p.get(key))
            .map(|s| s.trim())
            .unwrap_or_default();
        if sku.is_empty() {
            bail!("storage class {class_name} has no '{key}' parameter");
        }
        if class.provisioner != cfg.backend.csi_driver {
            log::warn!(
                "[migrate] storage class {class_name} is provisioned by '{}', volumes will use '{}'",
                class.provisioner,
                cfg.backend.csi_driver
            );
        }
        Ok(Self {
            class: class_name.to_string(),
            driver: cfg.backend.csi_driver.clone(),
            sku_key: key.clone(),
            sku: sku.to_string(),
            suffix: cfg.migration.name_suffix.clone(),
        })
    }

    pub fn volume_name(&self, old: &str) -> String {
        format!("{old}{}", self.suffix)
    }

    /// Replacement volume: same disk, same size, claimed by the same claim,
    /// served by the CSI driver.
    pub fn build_volume(&self, c: &Candidate) -> PersistentVolume {
        let name = self.volume_name(&c.name);

        let volume_attributes = BTreeMap::from([
            (ATTR_PV_NAME.to_string(), name.clone()),
            (ATTR_PVC_NAME.to_string(), c.claim_name.clone()),
            (ATTR_PVC_NAMESPACE.to_string(), c.claim_ns.clone()),
            (ATTR_REQUESTED_SIZE.to_string(), c.capacity.clone()),
            (self.sku_key.clone(), self.sku.clone()),
        ]);

        PersistentVolume {
            metadata: ObjectMeta {
                name: Some(name),
                annotations: Some(BTreeMap::from([(
                    PROVISIONED_BY_ANNOTATION.to_string(),
                    self.driver.clone(),
                )])),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                capacity: Some(storage_request(&c.capacity)),
                access_modes: Some(vec![READ_WRITE_ONCE.into()]),
                persistent_volume_reclaim_policy: Some(c.reclaim_policy.clone()),
                storage_class_name: Some(self.class.clone()),
                claim_ref: Some(ObjectReference {
                    kind: Some("PersistentVolumeClaim".into()),
                    api_version: Some("v1".into()),
                    name: Some(c.claim_name.clone()),
                    namespace: Some(c.claim_ns.clone()),
                    ..Default::default()
                }),
                csi: Some(CSIPersistentVolumeSource {
                    driver: self.driver.clone(),
                    volume_handle: c.disk_uri.clone(),
                    volume_attributes: Some(volume_attributes),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Replacement claim pinned to `volume_name`, so the binder picks the
    /// pre-created volume instead of provisioning a fresh one.
    pub fn build_claim(
        &self,
        existing: &PersistentVolumeClaim,
        c: &Candidate,
        volume_name: &str,
    ) -> PersistentVolumeClaim {
        let mut annotations = existing.metadata.annotations.clone();
        if let Some(a) = annotations.as_mut() {
            a.remove(BIND_COMPLETED_ANNOTATION);
        }

        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(c.claim_name.clone()),
                namespace: Some(c.claim_ns.clone()),
                labels: existing.metadata.labels.clone(),
                annotations,
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: existing.spec.as_ref().and_then(|s| s.access_modes.clone()),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(storage_request(&c.capacity)),
                    ..Default::default()
                }),
                storage_class_name: Some(self.class.clone()),
                volume_name: Some(volume_name.to_string()),
                ..Default::default()
            }),
            status: None,
        }
    }
}

fn storage_request(capacity: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([(STORAGE.to_string(), Quantity(capacity.to_string()))])
}
