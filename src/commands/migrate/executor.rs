use anyhow::{Context, Result};
use tracing as log;

use super::{
    audit::AuditDir,
    consumers::PauseMark,
    discover::{Candidate, select},
    sequencer::{Cutover, WaitPolicy},
    transform::Target,
    types::{RunCtx, RunOpts},
};
use crate::{config::Config, tooling::KubePort, ui};

/// Migrates every eligible volume of `opts.source_class`.
///
/// Failing to read the target class or list volumes aborts the run before
/// anything is touched. After that each volume stands alone, and every
/// queued restore runs once at the end. With `delete_migrated`, only volumes
/// whose cutover finished are deleted, after the restores.
pub fn migrate(kube: &dyn KubePort, cfg: &Config, opts: &RunOpts) -> Result<()> {
    let class = kube
        .storage_class(&opts.target_class)
        .with_context(|| format!("get storage class {}", opts.target_class))?;
    let target = Target::resolve(cfg, &class)?;

    let candidates = discover(kube, cfg, &opts.source_class)?;
    ui::log_plan(&candidates, &target);
    if candidates.is_empty() {
        log::info!("[migrate] nothing to migrate");
        return Ok(());
    }

    let audit = AuditDir::create(&opts.cluster_name, cfg.audit.volume_manifest)?;
    let cutover = Cutover {
        kube,
        audit: &audit,
        target: &target,
        mark: PauseMark {
            key: &cfg.migration.pause_label_key,
            value: &cfg.migration.pause_label_value,
        },
        wait: WaitPolicy::from_config(&cfg.migration, opts.wait_timeout),
    };

    let mut run = RunCtx::default();
    let mut migrated = Vec::new();
    let mut failed = 0usize;
    for c in &candidates {
        match cutover.run(&mut run, c) {
            Ok(_) => migrated.push(c.name.as_str()),
            Err(e) => {
                failed += 1;
                log::error!("[migrate] {}: {e:#}", c.name);
            }
        }
    }

    restore(kube, &mut run);
    if opts.delete_migrated {
        delete_old_volumes(kube, &migrated);
    }
    log::info!(
        "[migrate] done: {} migrated, {failed} failed, manifests in {}",
        migrated.len(),
        audit.root().display()
    );
    Ok(())
}

/// Lists what `migrate` would pick up without touching the cluster.
pub fn plan(
    kube: &dyn KubePort,
    cfg: &Config,
    source_class: &str,
    target_class: Option<&str>,
) -> Result<Vec<Candidate>> {
    let target = match target_class {
        Some(name) => {
            let class = kube
                .storage_class(name)
                .with_context(|| format!("get storage class {name}"))?;
            Some(Target::resolve(cfg, &class)?)
        }
        None => None,
    };
    let candidates = discover(kube, cfg, source_class)?;
    match &target {
        Some(t) => ui::log_plan(&candidates, t),
        None => ui::log_candidates(&candidates, &cfg.migration.name_suffix),
    }
    Ok(candidates)
}

fn discover(kube: &dyn KubePort, cfg: &Config, source_class: &str) -> Result<Vec<Candidate>> {
    let volumes = kube.list_volumes().context("list persistent volumes")?;
    log::debug!("[migrate] {} volumes in cluster", volumes.len());
    Ok(select(&volumes, cfg, source_class))
}

/// Runs the queued restores newest first. Failures are logged and skipped.
fn restore(kube: &dyn KubePort, run: &mut RunCtx) {
    if !run.pending().is_empty() {
        log::info!("[restore] {} queued action(s)", run.pending().len());
    }
    for action in run.drain_lifo() {
        log::info!("[restore] {action}");
        if let Err(e) = action.execute(kube) {
            log::error!("[restore] {action} failed: {e:#}");
        }
    }
}

/// Removes the old volume objects of completed cutovers. Failures are logged.
fn delete_old_volumes(kube: &dyn KubePort, names: &[&str]) {
    for name in names {
        log::info!("[migrate] deleting old volume {name}");
        if let Err(e) = kube.delete_volume(name) {
            log::error!("[migrate] delete old volume {name}: {e:#}");
        }
    }
}
