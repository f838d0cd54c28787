//! # Orphan Reaper
//!
//! Removes managed mounter containers that are no longer alive: leftovers
//! from renamed hosts, crashed replacements, or `created` containers whose
//! start never happened.

use tracing::{info, warn};

use super::{Controller, MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE, MEDIUM_DEADLINE, MOUNTER_NAME_PREFIX, SHORT_DEADLINE};
use crate::runtime::ListFilter;

impl Controller {
    /// Force-removes every managed mounter that is neither running nor
    /// restarting. Returns the number of containers removed.
    pub async fn reap_orphans(&self) -> u64 {
        let filter = ListFilter {
            all: true,
            labels: vec![format!("{MANAGED_LABEL_KEY}={MANAGED_LABEL_VALUE}")],
            names: vec![MOUNTER_NAME_PREFIX.to_owned()],
        };
        let containers = match self.runtime.list_containers(filter, SHORT_DEADLINE).await {
            Ok(list) => list,
            Err(err) => {
                warn!("orphan scan failed: {err}");
                return 0;
            }
        };

        let mut removed = 0;
        for container in containers {
            if !container.name.starts_with(MOUNTER_NAME_PREFIX) {
                continue;
            }
            if container.state == "running" || container.state == "restarting" {
                continue;
            }
            match self
                .runtime
                .remove_container(&container.id, true, MEDIUM_DEADLINE)
                .await
            {
                Ok(()) => {
                    info!(
                        "reaped orphan mounter '{}' (state {})",
                        container.name, container.state
                    );
                    removed += 1;
                    self.metrics.orphan_cleanup_total.inc();
                }
                Err(err) => warn!("could not remove orphan '{}': {err}", container.name),
            }
        }
        removed
    }
}
