//! # Host Helper Invoker
//!
//! One-shot privileged container runs for mount-namespace operations. Each
//! helper enters the host mount namespace through PID 1 and falls back to its
//! own namespace when `nsenter` is unavailable. Helpers are fire-and-forget:
//! the invoker starts them, waits about a second for the side effect, and
//! always removes the container — the mount prober is the source of truth for
//! whether the operation worked.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::warn;

use super::{detect_hostname, Controller, MEDIUM_DEADLINE, SHORT_DEADLINE};
use crate::runtime::{ContainerSpec, RuntimeError};

impl Controller {
    /// Marks the mountpoint subtree rshared in the host namespace so sibling
    /// containers see mount events under it.
    pub async fn ensure_rshared(&self, path: &str) -> Result<()> {
        let command = format!(
            "nsenter -t 1 -m -- mount --make-rshared {path} || mount --make-rshared {path}"
        );
        self.run_host_helper("rshared", path, &command).await
    }

    /// Lazily detaches a stuck FUSE mount. Both unmount forms tolerate
    /// failure; the follow-up probe decides whether the heal worked.
    pub async fn lazy_unmount(&self, path: &str) -> Result<()> {
        let inner = format!("fusermount -uz {path}; umount -l {path}; true");
        let command = format!("nsenter -t 1 -m -- sh -c '{inner}' || {{ {inner}; }}");
        self.run_host_helper("unmount", path, &command).await
    }

    /// Verifies the helper image can run `nsenter` at all. Unlike the mount
    /// helpers this waits for the exit code.
    pub async fn check_nsenter(&self) -> Result<()> {
        let name = self.helper_name("nsenter-check");
        let image = self.helper_image().await;
        self.ensure_image_present(&image).await?;
        self.remove_leftover(&name).await;

        let spec = ContainerSpec {
            name: name.clone(),
            image,
            cmd: vec!["nsenter".to_owned(), "--version".to_owned()],
            ..Default::default()
        };
        let run = async {
            self.runtime
                .create_container(spec, MEDIUM_DEADLINE)
                .await
                .context("create nsenter check container")?;
            self.runtime
                .start_container(&name, SHORT_DEADLINE)
                .await
                .context("start nsenter check container")?;
            let exit = self
                .runtime
                .wait_container(&name, MEDIUM_DEADLINE)
                .await
                .context("wait for nsenter check")?;
            if exit.status_code != 0 {
                anyhow::bail!("nsenter exited with status {}", exit.status_code);
            }
            Ok(())
        };
        let result = run.await;
        self.remove_helper(&name).await;
        result
    }

    /// Runs a privileged one-shot helper joined to the host PID namespace
    /// with `path` bound in. The helper is always removed, error path
    /// included.
    async fn run_host_helper(&self, role: &str, path: &str, command: &str) -> Result<()> {
        let name = self.helper_name(role);
        let image = self.helper_image().await;
        self.ensure_image_present(&image).await?;
        self.remove_leftover(&name).await;

        let spec = ContainerSpec {
            name: name.clone(),
            image,
            cmd: vec!["sh".to_owned(), "-c".to_owned(), command.to_owned()],
            binds: vec![format!("{path}:{path}")],
            privileged: true,
            pid_mode: Some("host".to_owned()),
            ..Default::default()
        };
        let run = async {
            self.runtime
                .create_container(spec, MEDIUM_DEADLINE)
                .await
                .with_context(|| format!("create {role} helper"))?;
            self.runtime
                .start_container(&name, SHORT_DEADLINE)
                .await
                .with_context(|| format!("start {role} helper"))?;
            // give the namespace operation a moment; we do not wait for exit
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        };
        let result = run.await;
        self.remove_helper(&name).await;
        result
    }

    /// Resolves the helper image: the configured one, else the controller's
    /// own image discovered by inspecting the container this process runs in,
    /// else the mounter image.
    pub(crate) async fn helper_image(&self) -> String {
        if !self.cfg.helper_image.is_empty() {
            return self.cfg.helper_image.clone();
        }
        if let Some(cached) = self.state.lock().expect("state lock").helper_image.clone() {
            return cached;
        }
        let own_id = detect_hostname();
        let discovered = match self.runtime.inspect_container(&own_id, SHORT_DEADLINE).await {
            Ok(details) if !details.image_ref.is_empty() => Some(details.image_ref),
            Ok(_) => None,
            Err(err) => {
                warn!("could not discover own image via container {own_id}: {err}");
                None
            }
        };
        let image = discovered.unwrap_or_else(|| self.cfg.mounter_image.clone());
        self.state.lock().expect("state lock").helper_image = Some(image.clone());
        image
    }

    /// Clears a leftover helper from a previous crashed run, if any.
    async fn remove_leftover(&self, name: &str) {
        match self.runtime.remove_container(name, true, MEDIUM_DEADLINE).await {
            Ok(()) => {}
            Err(RuntimeError::NotFound(_)) => {}
            Err(err) => warn!("could not remove leftover helper {name}: {err}"),
        }
    }

    async fn remove_helper(&self, name: &str) {
        match self.runtime.remove_container(name, true, MEDIUM_DEADLINE).await {
            Ok(()) => {}
            Err(RuntimeError::NotFound(_)) => {}
            Err(err) => warn!("could not remove helper {name}: {err}"),
        }
    }
}
