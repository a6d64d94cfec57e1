use std::time::Duration;

use anyhow::Result;
use clap::{Args, builder::NonEmptyStringValueParser};

use crate::{
    AppCtx,
    utils::{exec_policy::with_dry_run_enabled, lock::LockGuard},
};
use types::RunOpts;

pub use discover::Candidate;
pub use transform::Target;

mod audit;
mod consumers;
mod discover;
mod executor;
mod sequencer;
mod transform;
mod types;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Storage class whose in-tree volumes are migrated.
    #[arg(long = "existing-storageclass", value_parser = NonEmptyStringValueParser::new())]
    pub source_class: String,

    /// CSI storage class the volumes move to.
    #[arg(long = "new-storageclass", value_parser = NonEmptyStringValueParser::new())]
    pub target_class: String,

    /// Cluster name; also the directory the manifests are saved under.
    #[arg(long = "clustername", value_parser = NonEmptyStringValueParser::new())]
    pub cluster_name: String,

    /// Delete the old volume objects once the run is over.
    #[arg(long)]
    pub delete_migrated: bool,

    #[arg(long)]
    pub dry_run: bool,

    /// Give up on a volume if its old claim is not gone after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub wait_timeout: Option<u64>,
}

impl RunArgs {
    pub fn run(&self, ctx: &AppCtx) -> Result<()> {
        let _lock = LockGuard::try_acquire(&self.cluster_name)?;

        let opts = RunOpts {
            source_class: self.source_class.clone(),
            target_class: self.target_class.clone(),
            cluster_name: self.cluster_name.clone(),
            delete_migrated: self.delete_migrated,
            wait_timeout: self
                .wait_timeout
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
        };
        let kube = ctx.tools.kube();
        with_dry_run_enabled(self.dry_run, || {
            executor::migrate(kube.as_ref(), &ctx.cfg, &opts)
        })
    }
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[arg(long = "existing-storageclass", value_parser = NonEmptyStringValueParser::new())]
    pub source_class: String,

    /// When set, the class is checked for a usable SKU as well.
    #[arg(long = "new-storageclass", value_parser = NonEmptyStringValueParser::new())]
    pub target_class: Option<String>,
}

impl PlanArgs {
    pub fn run(&self, ctx: &AppCtx) -> Result<()> {
        let kube = ctx.tools.kube();
        executor::plan(
            kube.as_ref(),
            &ctx.cfg,
            &self.source_class,
            self.target_class.as_deref(),
        )?;
        Ok(())
    }
}
