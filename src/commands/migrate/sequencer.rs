use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use tracing as log;

use super::{
    audit::AuditDir,
    consumers::{PauseMark, pause_claim_consumers},
    discover::Candidate,
    transform::Target,
    types::RunCtx,
};
use crate::{
    config::Migration,
    resources::{RECLAIM_RETAIN, name},
    tooling::KubePort,
    utils::exec_policy,
};

/// How long and how often to poll for the old claim to go away.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl WaitPolicy {
    pub fn from_config(m: &Migration, timeout_override: Option<Duration>) -> Self {
        Self {
            interval: m.poll_interval,
            timeout: timeout_override.or(m.wait_timeout),
        }
    }
}

/// Moves a single volume and its claim over to the target class.
pub struct Cutover<'a> {
    pub kube: &'a dyn KubePort,
    pub audit: &'a AuditDir,
    pub target: &'a Target,
    pub mark: PauseMark<'a>,
    pub wait: WaitPolicy,
}

impl Cutover<'_> {
    /// Runs every step for `c` in order and returns the new volume name.
    ///
    /// Any error abandons this volume only. Restores queued on `run` before
    /// the failure still happen at the end of the batch.
    pub fn run(&self, run: &mut RunCtx, c: &Candidate) -> Result<String> {
        let kube = self.kube;
        let (ns, claim) = (c.claim_ns.as_str(), c.claim_name.as_str());

        if c.reclaim_policy != RECLAIM_RETAIN {
            log::info!(
                "[migrate] setting reclaim policy of {} from {} to {RECLAIM_RETAIN}",
                c.name,
                c.reclaim_policy
            );
            kube.set_reclaim_policy(&c.name, RECLAIM_RETAIN)
                .with_context(|| format!("set reclaim policy of {} to {RECLAIM_RETAIN}", c.name))?;
        }

        pause_claim_consumers(kube, run, self.mark, ns, claim)
            .with_context(|| format!("pause consumers of claim {ns}/{claim}"))?;

        let new_volume = self.target.build_volume(c);
        let new_name = name(&new_volume.metadata).to_string();
        self.audit.write_volume(&c.name, &new_volume)?;
        log::info!("[migrate] creating volume {new_name}");
        kube.create_volume(&new_volume)
            .with_context(|| format!("create volume {new_name}"))?;

        let existing = kube
            .get_claim(ns, claim)
            .with_context(|| format!("get claim {ns}/{claim}"))?
            .with_context(|| format!("claim {ns}/{claim} not found"))?;
        self.audit.write_original_claim(&existing)?;

        let new_claim = self.target.build_claim(&existing, c, &new_name);
        let new_claim_path = self.audit.write_new_claim(&new_claim)?;
        log::info!("[migrate] deleting claim {ns}/{claim}");
        kube.delete_claim(ns, claim)
            .with_context(|| format!("delete claim {ns}/{claim}"))?;

        if exec_policy::is_dry_run() {
            log::info!("[DRY-RUN] not waiting for claim {ns}/{claim} to disappear");
        } else {
            wait_for_claim_deletion(kube, ns, claim, self.wait)?;
        }

        log::info!("[migrate] creating claim {ns}/{claim} bound to {new_name}");
        kube.create_claim(&new_claim).with_context(|| {
            format!(
                "claim {ns}/{claim} was deleted but could not be recreated; \
                 its manifest is saved at {}",
                new_claim_path.display()
            )
        })?;

        log::info!("[migrate] {} -> {new_name} done", c.name);
        Ok(new_name)
    }
}

/// Polls until the claim is gone. Failed reads are logged and retried.
pub fn wait_for_claim_deletion(
    kube: &dyn KubePort,
    ns: &str,
    name: &str,
    policy: WaitPolicy,
) -> Result<()> {
    let started = Instant::now();
    log::info!("[migrate] waiting for claim {ns}/{name} to be deleted");
    loop {
        match kube.get_claim(ns, name) {
            Ok(None) => return Ok(()),
            Ok(Some(_)) => log::debug!("[migrate] claim {ns}/{name} still exists"),
            Err(e) => log::warn!("[migrate] checking claim {ns}/{name}: {e:#}"),
        }
        if let Some(limit) = policy.timeout
            && started.elapsed() >= limit
        {
            bail!(
                "claim {ns}/{name} still exists after {}s; giving up on this volume",
                limit.as_secs()
            );
        }
        thread::sleep(policy.interval);
    }
}
