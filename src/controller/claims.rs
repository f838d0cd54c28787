//! # Claim Provisioner
//!
//! Materializes collected claims idempotently: remote-side bucket/prefix
//! creation through short-lived `rclone mkdir` containers, then a local
//! directory under the mountpoint. Remote failures are warnings; the local
//! directory is attempted regardless.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::labels::ClaimSpec;
use super::{Controller, MEDIUM_DEADLINE, SHORT_DEADLINE};
use crate::runtime::ContainerSpec;

impl Controller {
    /// Provisions every claim. The caller has already established that the
    /// mount is writable.
    pub async fn provision_claims(&self, claims: &[ClaimSpec]) {
        for claim in claims {
            if self.cfg.auto_create_bucket && !claim.bucket.is_empty() && !self.cfg.read_only {
                let target = format!("S3:{}", claim.bucket);
                if let Err(err) = self.remote_mkdir(&target).await {
                    warn!("remote bucket create '{target}' failed: {err:#}");
                }
            }
            if self.cfg.auto_create_prefix && !claim.prefix.is_empty() && !self.cfg.read_only {
                let joined = format!("{}/{}", claim.bucket, claim.prefix);
                let target = format!("S3:{}", joined.trim_matches('/'));
                if let Err(err) = self.remote_mkdir(&target).await {
                    warn!("remote prefix create '{target}' failed: {err:#}");
                }
            }
            let dir = local_claim_dir(&self.cfg.mountpoint, &claim.prefix);
            if let Err(err) = std::fs::create_dir_all(&dir) {
                warn!("local claim dir {} failed: {err}", dir.display());
            } else {
                debug!("claim dir {} present", dir.display());
            }
        }
    }

    /// Runs `rclone mkdir <target>` in a short-lived container with the same
    /// environment as the long-running mounter, waits for it, and removes it.
    async fn remote_mkdir(&self, target: &str) -> Result<()> {
        let name = self.helper_name("s3-mkdir");
        self.ensure_image_present(&self.cfg.mounter_image).await?;
        match self.runtime.remove_container(&name, true, MEDIUM_DEADLINE).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!("could not remove leftover {name}: {err}"),
        }

        let spec = ContainerSpec {
            name: name.clone(),
            image: self.cfg.mounter_image.clone(),
            cmd: vec!["mkdir".to_owned(), target.to_owned()],
            env: self.mounter_env(),
            network: if self.cfg.proxy_network.is_empty() {
                None
            } else {
                Some(self.cfg.proxy_network.clone())
            },
            ..Default::default()
        };
        let run = async {
            self.runtime
                .create_container(spec, MEDIUM_DEADLINE)
                .await
                .context("create mkdir helper")?;
            self.runtime
                .start_container(&name, SHORT_DEADLINE)
                .await
                .context("start mkdir helper")?;
            let exit = self
                .runtime
                .wait_container(&name, MEDIUM_DEADLINE)
                .await
                .context("wait for mkdir helper")?;
            if exit.status_code != 0 {
                anyhow::bail!("mkdir exited with status {}", exit.status_code);
            }
            Ok(())
        };
        let result = run.await;
        match self.runtime.remove_container(&name, true, MEDIUM_DEADLINE).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!("could not remove mkdir helper {name}: {err}"),
        }
        result
    }
}

/// Lexically cleans `/<prefix>` (resolving `.` and `..`, never above the
/// root) and re-roots the result under the mountpoint, so a claim can never
/// escape it.
pub fn local_claim_dir(mountpoint: &str, prefix: &str) -> PathBuf {
    let rooted = format!("/{prefix}");
    let mut parts: Vec<&str> = Vec::new();
    for component in rooted.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    let mut dir = Path::new(mountpoint).to_path_buf();
    for part in parts {
        dir.push(part);
    }
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_dir_joins_under_mountpoint() {
        assert_eq!(
            local_claim_dir("/mnt/s3", "team/data"),
            PathBuf::from("/mnt/s3/team/data")
        );
    }

    #[test]
    fn claim_dir_cleans_dot_segments() {
        assert_eq!(
            local_claim_dir("/mnt/s3", "a/./b//c"),
            PathBuf::from("/mnt/s3/a/b/c")
        );
    }

    #[test]
    fn claim_dir_never_escapes_mountpoint() {
        for prefix in ["../../etc", "a/../../..", "..", "../x", "a/../../b"] {
            let dir = local_claim_dir("/mnt/s3", prefix);
            assert!(
                dir.starts_with("/mnt/s3"),
                "'{prefix}' escaped to {}",
                dir.display()
            );
        }
    }
}
