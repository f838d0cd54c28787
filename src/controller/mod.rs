//! # Controller Core
//!
//! The [`Controller`] record is the process-wide state: immutable
//! configuration, the runtime client handle, metrics, the nudge channel and
//! the small amount of supervisor memory (desired image id, pull clock).
//! All mutation happens on the reconcile task.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::observability::{Metrics, MetricsSnapshot};
use crate::runtime::ContainerRuntime;

pub mod claims;
pub mod helper;
pub mod labels;
pub mod mounter;
pub mod orphans;
pub mod probe;
pub mod reconcile;

/// Label stamped on every container this controller manages.
pub const MANAGED_LABEL_KEY: &str = "swarmnative.mounter";
pub const MANAGED_LABEL_VALUE: &str = "managed";

/// Name prefix for the managed mounter; host identity completes it.
pub const MOUNTER_NAME_PREFIX: &str = "rclone-mounter-";

/// DNS alias prefix for the node-local S3 load balancer.
pub const LB_ALIAS_PREFIX: &str = "volume-s3-lb-";

/// Deadlines for runtime calls.
pub(crate) const SHORT_DEADLINE: Duration = Duration::from_secs(5);
pub(crate) const MEDIUM_DEADLINE: Duration = Duration::from_secs(20);
pub(crate) const PULL_DEADLINE: Duration = Duration::from_secs(60);

/// Supervisor memory that survives across reconciles.
#[derive(Debug, Default)]
pub struct SupervisorState {
    /// Image id the mounter should be running; set by the refresh path.
    pub desired_image_id: Option<String>,
    /// When the last periodic pull happened.
    pub last_pull: Option<Instant>,
    /// Resolved helper image (config value or self-discovered).
    pub helper_image: Option<String>,
}

pub struct Controller {
    pub cfg: Config,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) metrics: Metrics,
    nudge_tx: mpsc::Sender<()>,
    /// Sanitized host name; the single-instance interlock key.
    pub(crate) host: String,
    pub(crate) state: Mutex<SupervisorState>,
}

impl Controller {
    pub fn new(
        cfg: Config,
        runtime: Arc<dyn ContainerRuntime>,
        nudge_tx: mpsc::Sender<()>,
    ) -> Self {
        let host = sanitize_hostname(&detect_hostname());
        Self {
            cfg,
            runtime,
            metrics: Metrics::new(),
            nudge_tx,
            host,
            state: Mutex::new(SupervisorState::default()),
        }
    }

    /// Name of the managed mounter container on this host.
    pub fn mounter_name(&self) -> String {
        format!("{MOUNTER_NAME_PREFIX}{}", self.host)
    }

    /// Name for a one-shot helper container.
    pub fn helper_name(&self, role: &str) -> String {
        format!("{role}-{}", self.host)
    }

    /// Node-local load balancer alias for this host.
    pub fn lb_alias(&self) -> String {
        format!("{LB_ALIAS_PREFIX}{}", self.host)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Schedules an early reconcile; duplicate nudges collapse to one.
    pub fn nudge(&self) {
        let _ = self.nudge_tx.try_send(());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Host name of this node, as seen from inside the controller container.
pub(crate) fn detect_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_owned())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "node".to_owned())
}

/// Reduces a host name to `[A-Za-z0-9-]+` with no leading or trailing `-`,
/// so it is always usable inside a container name.
pub fn sanitize_hostname(host: &str) -> String {
    let replaced: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let trimmed = replaced.trim_matches('-');
    if trimmed.is_empty() {
        "node".to_owned()
    } else {
        trimmed.to_owned()
    }
}
