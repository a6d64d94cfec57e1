use std::{path::Path, sync::Arc};

use anyhow::Result;

use crate::{
    config::Config,
    utils::{bins::ensure_bins, process::Runner},
};

#[cfg(test)]
pub mod fake;
pub mod kube;

pub use kube::{KubePort, KubectlCli};

pub struct Toolbox {
    kube: Arc<dyn KubePort>,
}

impl Toolbox {
    pub fn new(cfg: &Config, kubeconfig: &Path, runner: Arc<dyn Runner + Send + Sync>) -> Result<Self> {
        ensure_bins([cfg.kubectl.bin.as_str()])?;
        let kube = Arc::new(KubectlCli::new(runner, &cfg.kubectl, kubeconfig)) as Arc<dyn KubePort>;
        Ok(Self { kube })
    }

    #[inline]
    pub fn kube(&self) -> Arc<dyn KubePort> {
        self.kube.clone()
    }
}
