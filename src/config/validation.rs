//! # Static Configuration Validation
//!
//! Collect-don't-raise validation of the boot configuration. The report is
//! what `--validate-config` prints and what `GET /validate` serves.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

use super::{parse_duration, Config};

/// Outcome of validating a [`Config`].
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Flat masked view of the effective configuration.
    pub summary: BTreeMap<String, String>,
}

const UPDATE_MODES: [&str; 4] = ["", "never", "periodic", "on_change"];
const PRESETS: [&str; 6] = ["", "aws", "minio", "ceph", "wasabi", "aliyun"];

/// Validates every recognized option and aggregates all findings at once.
pub fn validate(cfg: &Config) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if cfg.mountpoint.trim().is_empty() {
        errors.push("mountpoint is required but is empty".to_owned());
    }

    if let Err(e) = validate_url(&cfg.s3_endpoint, "s3_endpoint") {
        errors.push(e);
    }

    if cfg.rclone_remote.trim().is_empty() {
        errors.push("rclone_remote is required but is empty".to_owned());
    }

    if cfg.mounter_image.trim().is_empty() {
        errors.push("mounter_image is required but is empty".to_owned());
    }

    if let Err(e) = parse_duration(&cfg.poll_interval) {
        errors.push(format!("poll_interval: {e}"));
    }
    if let Err(e) = parse_duration(&cfg.mounter_pull_interval) {
        errors.push(format!("mounter_pull_interval: {e}"));
    }

    if !UPDATE_MODES.contains(&cfg.mounter_update_mode.as_str()) {
        errors.push(format!(
            "mounter_update_mode '{}' is not one of never, periodic, on_change",
            cfg.mounter_update_mode
        ));
    }

    if !PRESETS.contains(&cfg.preset.as_str()) {
        errors.push(format!(
            "preset '{}' is not one of aws, minio, ceph, wasabi, aliyun",
            cfg.preset
        ));
    }

    if !cfg.proxy_port.is_empty() && cfg.proxy_port.parse::<u16>().is_err() {
        errors.push(format!("proxy_port '{}' is not numeric", cfg.proxy_port));
    }
    if cfg.http_port.parse::<u16>().is_err() {
        errors.push(format!("http_port '{}' is not numeric", cfg.http_port));
    }

    if cfg.ready_file.trim().is_empty() {
        errors.push("ready_file is required but is empty".to_owned());
    }

    if cfg.access_key.is_empty() {
        warnings.push(format!(
            "access key not resolvable: file '{}' unreadable and no VOLS3_ACCESS_KEY set",
            cfg.access_key_file
        ));
    }
    if cfg.secret_key.is_empty() {
        warnings.push(format!(
            "secret key not resolvable: file '{}' unreadable and no VOLS3_SECRET_KEY set",
            cfg.secret_key_file
        ));
    }

    if cfg.read_only && (cfg.auto_create_bucket || cfg.auto_create_prefix) {
        warnings
            .push("read_only is set; auto_create_bucket/auto_create_prefix are ignored".to_owned());
    }

    ValidationReport {
        ok: errors.is_empty(),
        errors,
        warnings,
        summary: cfg.summary(),
    }
}

/// URL must carry a scheme and a host.
fn validate_url(url: &str, field_name: &str) -> Result<(), String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(format!("{field_name} cannot be empty"));
    }
    let pattern = Regex::new(r"^https?://[^\s/$.?#].[^\s]*$")
        .map_err(|e| format!("failed to compile regex: {e}"))?;
    if !pattern.is_match(trimmed) {
        return Err(format!(
            "{field_name} '{trimmed}' must be a URL with scheme and host"
        ));
    }
    Ok(())
}
