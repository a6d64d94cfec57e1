use std::{collections::HashSet, fmt};

use tracing as log;

use k8s_openapi::api::core::v1::PersistentVolume;

use crate::{
    config::Config,
    resources::{annotation, name, volume_capacity},
};

/// A volume that passed every eligibility check, with its required fields
/// pulled out.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub claim_ns: String,
    pub claim_name: String,
    pub reclaim_policy: String,
    pub storage_class: String,
    pub capacity: String,
    pub disk_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reject {
    NotProvisioned,
    WrongClass(String),
    MissingField(&'static str),
    Excluded,
    AlreadyMigrated(String),
}

impl fmt::Display for Reject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reject::NotProvisioned => f.write_str("not created by the source provisioner"),
            Reject::WrongClass(c) => write!(f, "wrong storage class '{c}'"),
            Reject::MissingField(field) => write!(f, "required field {field} is empty"),
            Reject::Excluded => f.write_str("excluded by migration.exclude_re"),
            Reject::AlreadyMigrated(n) => write!(f, "replacement volume {n} already exists"),
        }
    }
}

pub fn classify(
    pv: &PersistentVolume,
    cfg: &Config,
    source_class: &str,
    existing: &HashSet<&str>,
) -> Result<Candidate, Reject> {
    if annotation(&pv.metadata, &cfg.backend.provisioned_by_key)
        != Some(cfg.backend.provisioned_by_value.as_str())
    {
        return Err(Reject::NotProvisioned);
    }

    let spec = pv.spec.as_ref();
    let storage_class = spec
        .and_then(|s| s.storage_class_name.as_deref())
        .unwrap_or_default();
    if !storage_class.eq_ignore_ascii_case(source_class) {
        return Err(Reject::WrongClass(storage_class.to_string()));
    }

    let claim = spec.and_then(|s| s.claim_ref.as_ref());
    let fields: [(&'static str, Option<&str>); 7] = [
        ("metadata.name", pv.metadata.name.as_deref()),
        ("spec.claimRef.namespace", claim.and_then(|c| c.namespace.as_deref())),
        ("spec.claimRef.name", claim.and_then(|c| c.name.as_deref())),
        (
            "spec.persistentVolumeReclaimPolicy",
            spec.and_then(|s| s.persistent_volume_reclaim_policy.as_deref()),
        ),
        ("spec.storageClassName", Some(storage_class)),
        ("spec.capacity.storage", volume_capacity(pv)),
        (
            "spec.azureDisk.diskURI",
            spec.and_then(|s| s.azure_disk.as_ref()).map(|d| d.disk_uri.as_str()),
        ),
    ];
    if let Some((field, _)) = fields
        .iter()
        .find(|(_, v)| v.is_none_or(|s| s.trim().is_empty()))
    {
        return Err(Reject::MissingField(*field));
    }
    let [name, claim_ns, claim_name, reclaim_policy, storage_class, capacity, disk_uri] =
        fields.map(|(_, v)| v.unwrap_or_default().to_string());

    if cfg.migration.excludes(&name) {
        return Err(Reject::Excluded);
    }
    let replacement = format!("{name}{}", cfg.migration.name_suffix);
    if existing.contains(replacement.as_str()) {
        return Err(Reject::AlreadyMigrated(replacement));
    }

    Ok(Candidate {
        name,
        claim_ns,
        claim_name,
        reclaim_policy,
        storage_class,
        capacity,
        disk_uri,
    })
}

/// Filters the cluster's volumes down to migration candidates, logging why
/// each of the others was left alone.
pub fn select(volumes: &[PersistentVolume], cfg: &Config, source_class: &str) -> Vec<Candidate> {
    let existing: HashSet<&str> = volumes.iter().map(|v| name(&v.metadata)).collect();
    let mut out = Vec::new();
    for pv in volumes {
        let pv_name = name(&pv.metadata);
        match classify(pv, cfg, source_class, &existing) {
            Ok(c) => out.push(c),
            Err(Reject::NotProvisioned) => {
                log::debug!("[migrate] skip {pv_name}: {}", Reject::NotProvisioned)
            }
            Err(Reject::WrongClass(c)) => {
                log::info!("[migrate] skip {pv_name}: wrong StorageClass, want {source_class} got {c}")
            }
            Err(r) => log::warn!("[migrate] skip {pv_name}: {r}"),
        }
    }
    out
}
