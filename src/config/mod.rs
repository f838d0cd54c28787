//! # Configuration
//!
//! Immutable per-process configuration, populated once from `VOLS3_*`
//! environment variables. Numeric and duration options are kept as the raw
//! strings they arrived in; typed accessors parse them with the documented
//! defaults, and [`validation`] reports anything unparseable instead of
//! panicking mid-reconcile.
//!
//! Booleans are enabled by the exact string `"true"`. Durations use the
//! `15s` / `24h` form (a number followed by `s`, `m`, `h` or `d`); a literal
//! `0` means "use the default".

use anyhow::Result;
use regex::Regex;
use std::collections::BTreeMap;
use std::time::Duration;

pub mod validation;

pub use validation::{validate, ValidationReport};

/// Image refresh policy for the managed mounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Never pull; run whatever image is present.
    #[default]
    Never,
    /// Pull when the pull interval has elapsed.
    Periodic,
    /// Pull every reconcile and replace on digest change.
    OnChange,
}

/// Vendor preset appended to the mounter command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    #[default]
    None,
    Aws,
    Minio,
    Ceph,
    Wasabi,
    Aliyun,
}

/// All recognized options. Constructed once at boot, never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    pub mountpoint: String,
    pub s3_endpoint: String,
    pub rclone_remote: String,
    pub mounter_image: String,
    /// Empty means "use the controller's own image, discovered at runtime".
    pub helper_image: String,
    pub access_key_file: String,
    pub secret_key_file: String,
    /// Resolved credential strings (env var wins over file contents).
    pub access_key: String,
    pub secret_key: String,
    pub poll_interval: String,
    pub mounter_update_mode: String,
    pub mounter_pull_interval: String,
    pub unmount_on_exit: bool,
    pub auto_create_bucket: bool,
    pub auto_create_prefix: bool,
    pub read_only: bool,
    pub enable_proxy: bool,
    pub local_lb_enabled: bool,
    pub proxy_port: String,
    pub proxy_network: String,
    pub label_prefix: String,
    pub label_strict: bool,
    pub strict_ready: bool,
    pub ready_file: String,
    pub preset: String,
    pub mount_extra_args: String,
    pub http_port: String,
    pub enable_metrics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mountpoint: "/mnt/s3".to_owned(),
            s3_endpoint: "http://minio:9000".to_owned(),
            rclone_remote: "S3:bucket".to_owned(),
            mounter_image: "rclone/rclone:latest".to_owned(),
            helper_image: String::new(),
            access_key_file: "/run/secrets/s3_access_key".to_owned(),
            secret_key_file: "/run/secrets/s3_secret_key".to_owned(),
            access_key: String::new(),
            secret_key: String::new(),
            poll_interval: "15s".to_owned(),
            mounter_update_mode: "never".to_owned(),
            mounter_pull_interval: "24h".to_owned(),
            unmount_on_exit: false,
            auto_create_bucket: false,
            auto_create_prefix: true,
            read_only: false,
            enable_proxy: false,
            local_lb_enabled: false,
            proxy_port: "18080".to_owned(),
            proxy_network: String::new(),
            label_prefix: String::new(),
            label_strict: false,
            strict_ready: false,
            ready_file: ".volume-s3-ready".to_owned(),
            preset: String::new(),
            mount_extra_args: String::new(),
            http_port: "8080".to_owned(),
            enable_metrics: true,
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_owned())
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => value == "true",
        Err(_) => default,
    }
}

fn read_secret_file(path: &str) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

impl Config {
    /// Builds the configuration from the environment.
    ///
    /// Credentials resolve here: `VOLS3_ACCESS_KEY` / `VOLS3_SECRET_KEY`
    /// override the file-based sources.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let access_key_file = env_or("VOLS3_ACCESS_KEY_FILE", &defaults.access_key_file);
        let secret_key_file = env_or("VOLS3_SECRET_KEY_FILE", &defaults.secret_key_file);
        let access_key = std::env::var("VOLS3_ACCESS_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| read_secret_file(&access_key_file))
            .unwrap_or_default();
        let secret_key = std::env::var("VOLS3_SECRET_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| read_secret_file(&secret_key_file))
            .unwrap_or_default();

        Self {
            mountpoint: env_or("VOLS3_MOUNTPOINT", &defaults.mountpoint),
            s3_endpoint: env_or("VOLS3_S3_ENDPOINT", &defaults.s3_endpoint),
            rclone_remote: env_or("VOLS3_RCLONE_REMOTE", &defaults.rclone_remote),
            mounter_image: env_or("VOLS3_MOUNTER_IMAGE", &defaults.mounter_image),
            helper_image: env_or("VOLS3_HELPER_IMAGE", &defaults.helper_image),
            access_key_file,
            secret_key_file,
            access_key,
            secret_key,
            poll_interval: env_or("VOLS3_POLL_INTERVAL", &defaults.poll_interval),
            mounter_update_mode: env_or("VOLS3_MOUNTER_UPDATE_MODE", &defaults.mounter_update_mode),
            mounter_pull_interval: env_or(
                "VOLS3_MOUNTER_PULL_INTERVAL",
                &defaults.mounter_pull_interval,
            ),
            unmount_on_exit: env_bool("VOLS3_UNMOUNT_ON_EXIT", defaults.unmount_on_exit),
            auto_create_bucket: env_bool("VOLS3_AUTO_CREATE_BUCKET", defaults.auto_create_bucket),
            auto_create_prefix: env_bool("VOLS3_AUTO_CREATE_PREFIX", defaults.auto_create_prefix),
            read_only: env_bool("VOLS3_READ_ONLY", defaults.read_only),
            enable_proxy: env_bool("VOLS3_ENABLE_PROXY", defaults.enable_proxy),
            local_lb_enabled: env_bool("VOLS3_LOCAL_LB", defaults.local_lb_enabled),
            proxy_port: env_or("VOLS3_PROXY_PORT", &defaults.proxy_port),
            proxy_network: env_or("VOLS3_PROXY_NETWORK", &defaults.proxy_network),
            label_prefix: env_or("VOLS3_LABEL_PREFIX", &defaults.label_prefix),
            label_strict: env_bool("VOLS3_LABEL_STRICT", defaults.label_strict),
            strict_ready: env_bool("VOLS3_STRICT_READY", defaults.strict_ready),
            ready_file: env_or("VOLS3_READY_FILE", &defaults.ready_file),
            preset: env_or("VOLS3_PRESET", &defaults.preset),
            mount_extra_args: env_or("VOLS3_MOUNT_EXTRA_ARGS", &defaults.mount_extra_args),
            http_port: env_or("VOLS3_HTTP_PORT", &defaults.http_port),
            enable_metrics: env_bool("VOLS3_ENABLE_METRICS", defaults.enable_metrics),
        }
    }

    /// Tick period; unparseable or zero falls back to 15s.
    pub fn poll_interval(&self) -> Duration {
        match parse_duration(&self.poll_interval) {
            Ok(d) if !d.is_zero() => d,
            _ => Duration::from_secs(15),
        }
    }

    /// Pull period for `periodic` mode; unparseable falls back to 24h.
    pub fn mounter_pull_interval(&self) -> Duration {
        match parse_duration(&self.mounter_pull_interval) {
            Ok(d) if !d.is_zero() => d,
            _ => Duration::from_secs(24 * 3600),
        }
    }

    pub fn update_mode(&self) -> UpdateMode {
        match self.mounter_update_mode.as_str() {
            "periodic" => UpdateMode::Periodic,
            "on_change" => UpdateMode::OnChange,
            _ => UpdateMode::Never,
        }
    }

    pub fn preset(&self) -> Preset {
        match self.preset.as_str() {
            "aws" => Preset::Aws,
            "minio" => Preset::Minio,
            "ceph" => Preset::Ceph,
            "wasabi" => Preset::Wasabi,
            "aliyun" => Preset::Aliyun,
            _ => Preset::None,
        }
    }

    pub fn http_port(&self) -> u16 {
        self.http_port.parse().unwrap_or(8080)
    }

    /// Extra mounter args, whitespace-split. Quoting is not supported.
    pub fn extra_args(&self) -> Vec<String> {
        self.mount_extra_args
            .split_whitespace()
            .map(str::to_owned)
            .collect()
    }

    /// Flat string map of the configuration with credentials masked.
    pub fn summary(&self) -> BTreeMap<String, String> {
        let mask = |v: &str| {
            if v.is_empty() {
                String::new()
            } else {
                "***".to_owned()
            }
        };
        BTreeMap::from([
            ("mountpoint".to_owned(), self.mountpoint.clone()),
            ("s3_endpoint".to_owned(), self.s3_endpoint.clone()),
            ("rclone_remote".to_owned(), self.rclone_remote.clone()),
            ("mounter_image".to_owned(), self.mounter_image.clone()),
            ("helper_image".to_owned(), self.helper_image.clone()),
            ("access_key".to_owned(), mask(&self.access_key)),
            ("secret_key".to_owned(), mask(&self.secret_key)),
            ("poll_interval".to_owned(), self.poll_interval.clone()),
            (
                "mounter_update_mode".to_owned(),
                self.mounter_update_mode.clone(),
            ),
            (
                "mounter_pull_interval".to_owned(),
                self.mounter_pull_interval.clone(),
            ),
            (
                "unmount_on_exit".to_owned(),
                self.unmount_on_exit.to_string(),
            ),
            (
                "auto_create_bucket".to_owned(),
                self.auto_create_bucket.to_string(),
            ),
            (
                "auto_create_prefix".to_owned(),
                self.auto_create_prefix.to_string(),
            ),
            ("read_only".to_owned(), self.read_only.to_string()),
            ("enable_proxy".to_owned(), self.enable_proxy.to_string()),
            (
                "local_lb_enabled".to_owned(),
                self.local_lb_enabled.to_string(),
            ),
            ("proxy_port".to_owned(), self.proxy_port.clone()),
            ("proxy_network".to_owned(), self.proxy_network.clone()),
            ("label_prefix".to_owned(), self.label_prefix.clone()),
            ("label_strict".to_owned(), self.label_strict.to_string()),
            ("strict_ready".to_owned(), self.strict_ready.to_string()),
            ("ready_file".to_owned(), self.ready_file.clone()),
            ("preset".to_owned(), self.preset.clone()),
            ("mount_extra_args".to_owned(), self.mount_extra_args.clone()),
            ("http_port".to_owned(), self.http_port.clone()),
            ("enable_metrics".to_owned(), self.enable_metrics.to_string()),
        ])
    }
}

/// Parses a duration of the form `<number><unit>` with unit `s`, `m`, `h`
/// or `d`. A bare `0` is accepted and means "unset".
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(anyhow::anyhow!("duration string cannot be empty"));
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let pattern = Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$")
        .map_err(|e| anyhow::anyhow!("failed to compile regex: {e}"))?;
    let lower = trimmed.to_lowercase();
    let captures = pattern.captures(&lower).ok_or_else(|| {
        anyhow::anyhow!("invalid duration '{trimmed}'. Expected <number><unit> (e.g. '15s', '24h')")
    })?;

    let number: u64 = captures["number"]
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid duration number in '{trimmed}': {e}"))?;
    let seconds = match &captures["unit"] {
        "s" => number,
        "m" => number * 60,
        "h" => number * 3600,
        "d" => number * 86400,
        unit => return Err(anyhow::anyhow!("invalid duration unit '{unit}'")),
    };
    Ok(Duration::from_secs(seconds))
}
