//! # Reconcile Engine
//!
//! The periodic loop that drives every other component, plus the event
//! subscription that shortens the interval to the next pass. One reconcile
//! is active at a time; the event task only ever touches the nudge channel.

use anyhow::{Context, Result};
use futures::StreamExt;
use rand::Rng;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{probe, Controller, MEDIUM_DEADLINE, SHORT_DEADLINE};
use crate::runtime::RuntimeError;

const EVENT_BACKOFF_MIN: Duration = Duration::from_secs(1);
const EVENT_BACKOFF_MAX: Duration = Duration::from_secs(30);
const STRICT_READY_TIMEOUT: Duration = Duration::from_secs(2);

impl Controller {
    /// Runs the reconcile loop until cancellation, then performs shutdown
    /// cleanup. Cleanup runs after the loop has exited and is deliberately
    /// not raced against the cancelled token.
    pub async fn run(self: Arc<Self>, mut nudge_rx: mpsc::Receiver<()>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.cfg.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                Some(()) = nudge_rx.recv() => {
                    debug!("reconcile nudged");
                }
            }
            self.reconcile_once().await;
        }

        info!("reconcile loop stopped");
        self.shutdown_cleanup().await;
    }

    /// One full reconcile pass. Step failures below the mounter supervisor
    /// are warnings; a supervisor failure counts as a reconcile error and
    /// the next tick retries.
    pub async fn reconcile_once(&self) {
        let started = Instant::now();
        self.metrics.reconcile_total.inc();

        if let Err(err) = ensure_dir(&self.cfg.mountpoint) {
            warn!("could not ensure mountpoint {}: {err}", self.cfg.mountpoint);
        }

        if let Err(err) = self.ensure_rshared(&self.cfg.mountpoint).await {
            warn!("make-rshared failed: {err:#}");
        }

        if let Err(err) = self.refresh_mounter_image().await {
            warn!("image refresh failed: {err:#}");
        }

        if let Err(err) = self.converge_mounter().await {
            error!("mounter supervision failed: {err:#}");
            self.metrics.reconcile_errors.inc();
        }

        let writable = self.check_and_heal().await;

        if writable {
            let claims = self.collect_claims().await;
            if !claims.is_empty() {
                debug!("provisioning {} claim(s)", claims.len());
            }
            self.provision_claims(&claims).await;
        }

        self.metrics.mount_writable.set(i64::from(writable));
        self.metrics
            .mounter_running
            .set(i64::from(self.mounter_running().await));

        self.reap_orphans().await;

        self.metrics
            .last_reconcile_ms
            .set(started.elapsed().as_millis() as i64);
    }

    /// Probes the mount; on failure lazily unmounts through the host helper
    /// and re-probes. Only an actual heal invocation counts as an attempt.
    pub async fn check_and_heal(&self) -> bool {
        if probe::test_rw(&self.cfg.mountpoint, self.cfg.read_only).await {
            return true;
        }
        self.metrics.heal_attempts_total.inc();
        warn!("mountpoint {} is stuck, healing", self.cfg.mountpoint);
        if let Err(err) = self.lazy_unmount(&self.cfg.mountpoint).await {
            warn!("lazy unmount failed: {err:#}");
        }
        let healed = probe::test_rw(&self.cfg.mountpoint, self.cfg.read_only).await;
        if healed {
            self.metrics.heal_success_total.inc();
            self.metrics.last_heal_success_unix.set(unix_now());
            info!("mountpoint {} healed", self.cfg.mountpoint);
        }
        healed
    }

    async fn mounter_running(&self) -> bool {
        match self
            .runtime
            .inspect_container(&self.mounter_name(), SHORT_DEADLINE)
            .await
        {
            Ok(details) => details.running,
            Err(RuntimeError::NotFound(_)) => false,
            Err(err) => {
                warn!("mounter status check failed: {err}");
                false
            }
        }
    }

    /// Event task: every runtime event collapses into at most one queued
    /// nudge. Dropped streams reconnect with capped exponential backoff and
    /// ±50% jitter so a fleet of nodes does not reconnect in lockstep.
    pub async fn run_event_task(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = EVENT_BACKOFF_MIN;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.runtime.subscribe_events(&["container", "service"]).await {
                Ok(mut stream) => loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        item = stream.next() => match item {
                            Some(Ok(event)) => {
                                debug!("runtime event {}/{}", event.kind, event.action);
                                self.nudge();
                                backoff = EVENT_BACKOFF_MIN;
                            }
                            Some(Err(err)) => {
                                warn!("event stream error: {err}");
                                break;
                            }
                            None => {
                                warn!("event stream ended");
                                break;
                            }
                        }
                    }
                },
                Err(err) => warn!("event subscription failed: {err}"),
            }

            let wait = jittered(backoff);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
            backoff = (backoff * 2).min(EVENT_BACKOFF_MAX);
        }
    }

    /// Readiness: the mountpoint must exist and (unless read-only) accept a
    /// sentinel write. Strict mode additionally probes the S3 endpoint.
    pub async fn ready(&self) -> Result<()> {
        let mountpoint = self.cfg.mountpoint.clone();
        let ready_file = self.cfg.ready_file.clone();
        let read_only = self.cfg.read_only;
        let check = tokio::task::spawn_blocking(move || -> Result<()> {
            let dir = Path::new(&mountpoint);
            if !dir.is_dir() {
                anyhow::bail!("mountpoint {mountpoint} does not exist");
            }
            if !read_only {
                let sentinel = dir.join(&ready_file);
                std::fs::write(&sentinel, b"ready").context("write ready sentinel")?;
                std::fs::remove_file(&sentinel).context("remove ready sentinel")?;
            }
            Ok(())
        });
        match tokio::time::timeout(Duration::from_secs(5), check).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => anyhow::bail!("readiness probe panicked: {join}"),
            Err(_) => anyhow::bail!("readiness probe timed out on {}", self.cfg.mountpoint),
        }

        if self.cfg.strict_ready {
            // probe the same endpoint the mounter connects through,
            // proxy-alias rewrite included
            let endpoint = self.effective_endpoint();
            let client = reqwest::Client::builder()
                .timeout(STRICT_READY_TIMEOUT)
                .build()
                .context("build readiness http client")?;
            let response = client
                .get(endpoint.as_str())
                .send()
                .await
                .with_context(|| format!("endpoint {endpoint} unreachable"))?;
            let status = response.status().as_u16();
            // backends without a health path on / answer 404; that still
            // proves the endpoint is alive
            if status >= 500 && status != 404 {
                anyhow::bail!("endpoint {endpoint} returned {status}");
            }
        }
        Ok(())
    }

    /// Boot-time environment checks, all aggregated rather than first-fail.
    pub async fn preflight(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if let Err(err) = self.runtime.ping(SHORT_DEADLINE).await {
            issues.push(format!("runtime unreachable: {err}"));
        }
        if self.cfg.access_key.is_empty() || self.cfg.secret_key.is_empty() {
            issues.push("S3 credentials not resolvable from files or environment".to_owned());
        }
        if let Err(err) = self.check_nsenter().await {
            issues.push(format!("helper image cannot run nsenter: {err:#}"));
        }
        issues
    }

    /// Post-cancellation cleanup. Detaches the mount and removes the managed
    /// mounter when configured to do so.
    async fn shutdown_cleanup(&self) {
        if !self.cfg.unmount_on_exit {
            return;
        }
        info!("unmount_on_exit set: healing mount and removing mounter");
        self.check_and_heal().await;
        match self
            .runtime
            .remove_container(&self.mounter_name(), true, MEDIUM_DEADLINE)
            .await
        {
            Ok(()) => info!("mounter removed"),
            Err(RuntimeError::NotFound(_)) => {}
            Err(err) => warn!("could not remove mounter on shutdown: {err}"),
        }
    }
}

fn ensure_dir(path: &str) -> std::io::Result<()> {
    if Path::new(path).is_dir() {
        return Ok(());
    }
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true).mode(0o755);
    builder.create(path)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..=1.5);
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_half_and_one_and_a_half() {
        for _ in 0..100 {
            let d = jittered(Duration::from_secs(10));
            assert!(d >= Duration::from_secs(5) && d <= Duration::from_secs(15));
        }
    }
}
