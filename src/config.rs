use std::{path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use config as cfg;
use regex::Regex;
use serde::{Deserialize, Serialize};

const DEFAULT_PROVISIONED_BY_KEY: &str = "volumehelper.VolumeDynamicallyCreatedByKey";
const DEFAULT_PROVISIONED_BY_VALUE: &str = "azure-disk-dynamic-provisioner";
const DEFAULT_CSI_DRIVER: &str = "disk.csi.azure.com";
const DEFAULT_SKU_PARAMETER: &str = "skuname";
const DEFAULT_NAME_SUFFIX: &str = "-csi";
const DEFAULT_PAUSE_KEY: &str = "storage-migration";
const DEFAULT_PAUSE_VALUE: &str = "in-progress";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    pub migration: Migration,
    pub audit: Audit,
    pub kubectl: Kubectl,
}

/// Source provisioner recognition and the target CSI driver.
#[derive(Debug, Clone, Serialize)]
pub struct Backend {
    pub provisioned_by_key: String,
    pub provisioned_by_value: String,
    pub csi_driver: String,
    pub sku_parameter: String,
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub name_suffix: String,
    pub pause_label_key: String,
    pub pause_label_value: String,
    pub poll_interval: Duration,
    /// `None` waits for the old claim to disappear for as long as it takes.
    pub wait_timeout: Option<Duration>,
    pub exclude_re: Option<Regex>,
    pub exclude_re_src: Option<String>,
}

impl Migration {
    pub fn excludes(&self, volume: &str) -> bool {
        self.exclude_re.as_ref().is_some_and(|re| re.is_match(volume))
    }
}

/// What goes into `<cluster>/<volume>.json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeManifest {
    /// The old volume name as a JSON string.
    #[default]
    Name,
    /// The complete manifest of the replacement volume.
    Full,
}

#[derive(Debug, Clone, Default)]
pub struct Audit {
    pub volume_manifest: VolumeManifest,
}

#[derive(Debug, Clone)]
pub struct Kubectl {
    pub bin: String,
    pub context: Option<String>,
}

impl Config {
    /// Loads the optional TOML file; without one every key takes its default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Self::from_raw(RawConfig::default());
        };
        let raw: RawConfig = cfg::Config::builder()
            .add_source(cfg::File::from(path))
            .build()
            .with_context(|| format!("load {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("deserialize {}", path.display()))?;
        Self::from_raw(raw).with_context(|| format!("validate {}", path.display()))
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let n = config_helpers::Normalizer;

        let backend = Backend {
            provisioned_by_key: n.required(
                "backend.provisioned_by_key",
                raw.backend.provisioned_by_key,
                DEFAULT_PROVISIONED_BY_KEY,
            )?,
            provisioned_by_value: n.required(
                "backend.provisioned_by_value",
                raw.backend.provisioned_by_value,
                DEFAULT_PROVISIONED_BY_VALUE,
            )?,
            csi_driver: n.required(
                "backend.csi_driver",
                raw.backend.csi_driver,
                DEFAULT_CSI_DRIVER,
            )?,
            sku_parameter: n.required(
                "backend.sku_parameter",
                raw.backend.sku_parameter,
                DEFAULT_SKU_PARAMETER,
            )?,
        };

        let poll_secs = raw
            .migration
            .poll_interval_secs
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_secs == 0 {
            bail!("migration.poll_interval_secs must be at least 1");
        }
        let wait_timeout = match raw.migration.wait_timeout_secs {
            None | Some(0) => None,
            Some(s) => Some(Duration::from_secs(s)),
        };
        let exclude_re_src = n.trim_opt(raw.migration.exclude_re);
        let exclude_re = match &exclude_re_src {
            Some(s) => {
                Some(Regex::new(s).with_context(|| format!("bad migration.exclude_re: {s}"))?)
            }
            None => None,
        };
        let pause_label_key = n.required(
            "migration.pause_label_key",
            raw.migration.pause_label_key,
            DEFAULT_PAUSE_KEY,
        )?;
        if pause_label_key.matches('/').count() > 1 {
            bail!("bad migration.pause_label_key '{pause_label_key}': at most one '/'");
        }
        let migration = Migration {
            name_suffix: n.required(
                "migration.name_suffix",
                raw.migration.name_suffix,
                DEFAULT_NAME_SUFFIX,
            )?,
            pause_label_key,
            pause_label_value: n.required(
                "migration.pause_label_value",
                raw.migration.pause_label_value,
                DEFAULT_PAUSE_VALUE,
            )?,
            poll_interval: Duration::from_secs(poll_secs),
            wait_timeout,
            exclude_re,
            exclude_re_src,
        };

        let kubectl = Kubectl {
            bin: n.required("kubectl.bin", raw.kubectl.bin, "kubectl")?,
            context: n.trim_opt(raw.kubectl.context),
        };

        Ok(Self {
            backend,
            migration,
            audit: Audit {
                volume_manifest: raw.audit.volume_manifest.unwrap_or_default(),
            },
            kubectl,
        })
    }

    pub fn to_toml(&self) -> Result<String> {
        #[derive(Serialize)]
        struct MigrationOut<'a> {
            name_suffix: &'a str,
            pause_label_key: &'a str,
            pause_label_value: &'a str,
            poll_interval_secs: u64,
            wait_timeout_secs: u64,
            #[serde(skip_serializing_if = "Option::is_none")]
            exclude_re: Option<&'a str>,
        }
        #[derive(Serialize)]
        struct AuditOut {
            volume_manifest: VolumeManifest,
        }
        #[derive(Serialize)]
        struct KubectlOut<'a> {
            bin: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            context: Option<&'a str>,
        }
        #[derive(Serialize)]
        struct Out<'a> {
            backend: &'a Backend,
            migration: MigrationOut<'a>,
            audit: AuditOut,
            kubectl: KubectlOut<'a>,
        }

        let m = &self.migration;
        let out = Out {
            backend: &self.backend,
            migration: MigrationOut {
                name_suffix: &m.name_suffix,
                pause_label_key: &m.pause_label_key,
                pause_label_value: &m.pause_label_value,
                poll_interval_secs: m.poll_interval.as_secs(),
                wait_timeout_secs: m.wait_timeout.map(|d| d.as_secs()).unwrap_or(0),
                exclude_re: m.exclude_re_src.as_deref(),
            },
            audit: AuditOut {
                volume_manifest: self.audit.volume_manifest,
            },
            kubectl: KubectlOut {
                bin: &self.kubectl.bin,
                context: self.kubectl.context.as_deref(),
            },
        };
        Ok(toml::to_string_pretty(&out)?)
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    backend: RawBackend,
    #[serde(default)]
    migration: RawMigration,
    #[serde(default)]
    audit: RawAudit,
    #[serde(default)]
    kubectl: RawKubectl,
}

#[derive(Debug, Deserialize, Default)]
struct RawBackend {
    provisioned_by_key: Option<String>,
    provisioned_by_value: Option<String>,
    csi_driver: Option<String>,
    sku_parameter: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawMigration {
    name_suffix: Option<String>,
    pause_label_key: Option<String>,
    pause_label_value: Option<String>,
    poll_interval_secs: Option<u64>,
    wait_timeout_secs: Option<u64>,
    exclude_re: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawAudit {
    volume_manifest: Option<VolumeManifest>,
}

#[derive(Debug, Deserialize, Default)]
struct RawKubectl {
    bin: Option<String>,
    context: Option<String>,
}

mod config_helpers {
    use anyhow::{Result, bail};

    pub(super) struct Normalizer;

    impl Normalizer {
        #[inline]
        pub fn trim_opt(&self, s: Option<String>) -> Option<String> {
            s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        }

        /// Missing keys fall back to `default`; present-but-blank ones are an error.
        pub fn required(&self, key: &str, s: Option<String>, default: &str) -> Result<String> {
            match s {
                None => Ok(default.to_string()),
                Some(v) => match self.trim_opt(Some(v)) {
                    Some(v) => Ok(v),
                    None => bail!("{key} must not be empty"),
                },
            }
        }
    }
}
