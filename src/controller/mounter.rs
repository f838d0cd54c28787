//! # Mounter Supervisor
//!
//! Desired-state convergence for the single long-running mounter container.
//! The container name (`rclone-mounter-<host>`) is the only interlock: name
//! uniqueness in the runtime guarantees at most one managed mounter per
//! host. The supervisor replaces the container on image drift and on start
//! failure, and otherwise leaves a running instance alone.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

use super::{Controller, MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE, MEDIUM_DEADLINE, PULL_DEADLINE, SHORT_DEADLINE};
use crate::config::{Preset, UpdateMode};
use crate::runtime::{ContainerSpec, DeviceSpec, RestartMode};

/// rclone flags appended for a vendor preset.
pub fn preset_args(preset: Preset) -> Vec<String> {
    let args: &[&str] = match preset {
        Preset::Aws => &["--s3-region=us-east-1"],
        Preset::Minio | Preset::Ceph => &["--s3-force-path-style=true"],
        Preset::Wasabi => &["--s3-region=us-east-1", "--s3-force-path-style=true"],
        Preset::Aliyun => &["--s3-provider=Alibaba", "--s3-force-path-style=true"],
        Preset::None => &[],
    };
    args.iter().map(|a| (*a).to_owned()).collect()
}

impl Controller {
    /// Endpoint the mounter should talk to. Rewritten to the node-local
    /// proxy alias when the proxy, local LB and a proxy network are all
    /// configured; the configured endpoint otherwise.
    pub fn effective_endpoint(&self) -> String {
        if self.cfg.enable_proxy && self.cfg.local_lb_enabled && !self.cfg.proxy_network.is_empty()
        {
            format!("http://{}:{}", self.lb_alias(), self.cfg.proxy_port)
        } else {
            self.cfg.s3_endpoint.clone()
        }
    }

    /// rclone-style S3 environment shared by the mounter and the ephemeral
    /// provisioning helpers.
    pub(crate) fn mounter_env(&self) -> Vec<String> {
        vec![
            "RCLONE_CONFIG_S3_TYPE=s3".to_owned(),
            format!("RCLONE_CONFIG_S3_ACCESS_KEY_ID={}", self.cfg.access_key),
            format!("RCLONE_CONFIG_S3_SECRET_ACCESS_KEY={}", self.cfg.secret_key),
            format!("RCLONE_CONFIG_S3_ENDPOINT={}", self.effective_endpoint()),
        ]
    }

    /// The mounter command line: base mount flags, preset flags, read-only
    /// flag, then user extras.
    pub fn mounter_command(&self) -> Vec<String> {
        let mut cmd = vec![
            "mount".to_owned(),
            self.cfg.rclone_remote.clone(),
            self.cfg.mountpoint.clone(),
            "--allow-other".to_owned(),
            "--vfs-cache-mode=writes".to_owned(),
            "--dir-cache-time=12h".to_owned(),
        ];
        cmd.extend(preset_args(self.cfg.preset()));
        if self.cfg.read_only {
            cmd.push("--read-only".to_owned());
        }
        cmd.extend(self.cfg.extra_args());
        cmd
    }

    /// Full create-spec for the managed mounter.
    pub fn mounter_spec(&self) -> ContainerSpec {
        let mountpoint = &self.cfg.mountpoint;
        let proxy_net = !self.cfg.proxy_network.is_empty();
        ContainerSpec {
            name: self.mounter_name(),
            image: self.cfg.mounter_image.clone(),
            cmd: self.mounter_command(),
            env: self.mounter_env(),
            labels: BTreeMap::from([(
                MANAGED_LABEL_KEY.to_owned(),
                MANAGED_LABEL_VALUE.to_owned(),
            )]),
            binds: vec![
                "/dev/fuse:/dev/fuse".to_owned(),
                format!("{mountpoint}:{mountpoint}:rshared"),
            ],
            cap_add: vec!["SYS_ADMIN".to_owned()],
            security_opt: vec![
                "apparmor=unconfined".to_owned(),
                "seccomp=unconfined".to_owned(),
            ],
            devices: vec![DeviceSpec {
                host_path: "/dev/fuse".to_owned(),
                container_path: "/dev/fuse".to_owned(),
                cgroup_permissions: "mrw".to_owned(),
            }],
            network: if proxy_net {
                Some(self.cfg.proxy_network.clone())
            } else {
                Some("bridge".to_owned())
            },
            network_aliases: if proxy_net && self.cfg.local_lb_enabled {
                vec![self.lb_alias()]
            } else {
                Vec::new()
            },
            restart: RestartMode::Always,
            ..Default::default()
        }
    }

    /// Inspects the image reference and pulls it when missing. Fails only
    /// when the image is still absent after the pull.
    pub async fn ensure_image_present(&self, reference: &str) -> Result<()> {
        match self.runtime.inspect_image(reference, SHORT_DEADLINE).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err).context("inspect image"),
        }
        self.runtime
            .pull_image(reference, PULL_DEADLINE)
            .await
            .with_context(|| format!("pull {reference}"))?;
        self.runtime
            .inspect_image(reference, SHORT_DEADLINE)
            .await
            .with_context(|| format!("image {reference} still absent after pull"))?;
        Ok(())
    }

    /// Image refresh per the configured update mode. Pull failures are
    /// warnings; the supervisor keeps running the last known image.
    pub async fn refresh_mounter_image(&self) -> Result<()> {
        match self.cfg.update_mode() {
            UpdateMode::Never => Ok(()),
            UpdateMode::Periodic => {
                let due = {
                    let state = self.state.lock().expect("state lock");
                    state
                        .last_pull
                        .is_none_or(|at| at.elapsed() >= self.cfg.mounter_pull_interval())
                };
                if !due {
                    return Ok(());
                }
                self.runtime
                    .pull_image(&self.cfg.mounter_image, PULL_DEADLINE)
                    .await
                    .context("periodic pull")?;
                let image = self
                    .runtime
                    .inspect_image(&self.cfg.mounter_image, SHORT_DEADLINE)
                    .await
                    .context("inspect after pull")?;
                let mut state = self.state.lock().expect("state lock");
                state.last_pull = Some(Instant::now());
                state.desired_image_id = Some(image.id);
                Ok(())
            }
            UpdateMode::OnChange => {
                self.runtime
                    .pull_image(&self.cfg.mounter_image, PULL_DEADLINE)
                    .await
                    .context("on_change pull")?;
                let image = self
                    .runtime
                    .inspect_image(&self.cfg.mounter_image, SHORT_DEADLINE)
                    .await
                    .context("inspect after pull")?;
                let mut state = self.state.lock().expect("state lock");
                if state.desired_image_id.as_deref() != Some(image.id.as_str()) {
                    info!("mounter image changed to {}", image.id);
                    state.desired_image_id = Some(image.id);
                }
                Ok(())
            }
        }
    }

    /// One supervisor pass: converge the managed mounter to "running on the
    /// desired image".
    pub async fn converge_mounter(&self) -> Result<()> {
        let name = self.mounter_name();
        let existing = match self.runtime.inspect_container(&name, SHORT_DEADLINE).await {
            Ok(details) => Some(details),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err).context("inspect mounter"),
        };

        let Some(details) = existing else {
            return self.create_and_start_mounter().await;
        };

        let desired = self
            .state
            .lock()
            .expect("state lock")
            .desired_image_id
            .clone();
        if let Some(want) = desired {
            if !want.is_empty() && details.image_id != want {
                info!(
                    "mounter image drift ({} != {}), replacing",
                    details.image_id, want
                );
                self.runtime
                    .remove_container(&name, true, MEDIUM_DEADLINE)
                    .await
                    .context("remove drifted mounter")?;
                return self.create_and_start_mounter().await;
            }
        }

        if details.running {
            return Ok(());
        }

        match self.runtime.start_container(&name, SHORT_DEADLINE).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("mounter start failed ({err}), recreating");
                self.runtime
                    .remove_container(&name, true, MEDIUM_DEADLINE)
                    .await
                    .context("remove unstartable mounter")?;
                self.create_and_start_mounter().await
            }
        }
    }

    async fn create_and_start_mounter(&self) -> Result<()> {
        let name = self.mounter_name();
        self.ensure_image_present(&self.cfg.mounter_image).await?;
        self.runtime
            .create_container(self.mounter_spec(), MEDIUM_DEADLINE)
            .await
            .context("create mounter")?;
        self.metrics.mounter_created_total.inc();
        self.runtime
            .start_container(&name, SHORT_DEADLINE)
            .await
            .context("start mounter")?;
        info!("mounter '{name}' created and started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::controller::tests_support::controller_with_config;

    #[test]
    fn preset_table_matches_vendors() {
        assert_eq!(preset_args(Preset::Aws), vec!["--s3-region=us-east-1"]);
        assert_eq!(preset_args(Preset::Minio), vec!["--s3-force-path-style=true"]);
        assert_eq!(preset_args(Preset::Ceph), vec!["--s3-force-path-style=true"]);
        assert_eq!(
            preset_args(Preset::Wasabi),
            vec!["--s3-region=us-east-1", "--s3-force-path-style=true"]
        );
        assert_eq!(
            preset_args(Preset::Aliyun),
            vec!["--s3-provider=Alibaba", "--s3-force-path-style=true"]
        );
        assert!(preset_args(Preset::None).is_empty());
    }

    #[test]
    fn default_command_is_the_plain_mount() {
        let controller = controller_with_config(Config::default());
        assert_eq!(
            controller.mounter_command(),
            vec![
                "mount",
                "S3:bucket",
                "/mnt/s3",
                "--allow-other",
                "--vfs-cache-mode=writes",
                "--dir-cache-time=12h",
            ]
        );
    }

    #[test]
    fn command_appends_preset_readonly_and_extras() {
        let cfg = Config {
            preset: "wasabi".to_owned(),
            read_only: true,
            mount_extra_args: "--transfers=8".to_owned(),
            ..Config::default()
        };
        let controller = controller_with_config(cfg);
        let cmd = controller.mounter_command();
        assert_eq!(
            cmd[6..].to_vec(),
            vec![
                "--s3-region=us-east-1",
                "--s3-force-path-style=true",
                "--read-only",
                "--transfers=8",
            ]
        );
    }

    #[test]
    fn endpoint_rewritten_only_with_full_proxy_setup() {
        let cfg = Config {
            enable_proxy: true,
            local_lb_enabled: true,
            proxy_network: "s3-proxy".to_owned(),
            ..Config::default()
        };
        let controller = controller_with_config(cfg);
        let expected = format!("http://volume-s3-lb-{}:18080", controller.host());
        assert_eq!(controller.effective_endpoint(), expected);
        assert!(controller
            .mounter_env()
            .contains(&format!("RCLONE_CONFIG_S3_ENDPOINT={expected}")));

        for partial in [
            Config {
                enable_proxy: true,
                local_lb_enabled: true,
                ..Config::default()
            },
            Config {
                enable_proxy: true,
                proxy_network: "s3-proxy".to_owned(),
                ..Config::default()
            },
            Config {
                local_lb_enabled: true,
                proxy_network: "s3-proxy".to_owned(),
                ..Config::default()
            },
        ] {
            let controller = controller_with_config(partial);
            assert_eq!(controller.effective_endpoint(), "http://minio:9000");
        }
    }

    #[test]
    fn spec_carries_fuse_and_propagation_plumbing() {
        let controller = controller_with_config(Config::default());
        let spec = controller.mounter_spec();
        assert!(spec.binds.contains(&"/dev/fuse:/dev/fuse".to_owned()));
        assert!(spec.binds.contains(&"/mnt/s3:/mnt/s3:rshared".to_owned()));
        assert_eq!(spec.cap_add, vec!["SYS_ADMIN"]);
        assert_eq!(spec.devices[0].cgroup_permissions, "mrw");
        assert_eq!(spec.restart, RestartMode::Always);
        assert_eq!(spec.labels["swarmnative.mounter"], "managed");
        assert_eq!(spec.network.as_deref(), Some("bridge"));
        assert!(spec.network_aliases.is_empty());
    }

    #[test]
    fn spec_joins_proxy_network_with_alias() {
        let cfg = Config {
            enable_proxy: true,
            local_lb_enabled: true,
            proxy_network: "s3-proxy".to_owned(),
            ..Config::default()
        };
        let controller = controller_with_config(cfg);
        let spec = controller.mounter_spec();
        assert_eq!(spec.network.as_deref(), Some("s3-proxy"));
        assert_eq!(spec.network_aliases, vec![controller.lb_alias()]);
    }
}
