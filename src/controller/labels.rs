//! # Label Parser & Claim Collector
//!
//! Peer containers declare prefix claims through `s3.*` labels. A key is
//! either a bare base (`s3.prefix`) or namespaced under a domain-style
//! prefix (`acme.io/s3.prefix`); the first `/` separates the two. Prefixed
//! keys override unprefixed ones, and conflicting prefixed values keep the
//! first key in sorted order.

use std::collections::BTreeMap;
use tracing::{error, warn};

use super::{Controller, SHORT_DEADLINE};
use crate::runtime::ListFilter;

/// The exact set of recognized label bases.
pub const CLAIM_BASES: [&str; 7] = [
    "s3.enabled",
    "s3.bucket",
    "s3.prefix",
    "s3.class",
    "s3.reclaim",
    "s3.access",
    "s3.args",
];

/// Prefix-provisioning intent derived from one container's labels.
///
/// `class`, `reclaim`, `access` and `args` are advisory and carried through
/// unenforced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSpec {
    pub enabled: bool,
    pub bucket: String,
    /// Slash-trimmed; a claim without a prefix is not actionable.
    pub prefix: String,
    pub class: String,
    pub reclaim: String,
    pub access: String,
    pub args: String,
}

/// Per-container label resolution result.
#[derive(Debug, Default)]
pub struct ResolvedLabels {
    pub values: BTreeMap<String, String>,
    /// Human-readable findings; logged at warn, or error under strict mode.
    pub issues: Vec<String>,
}

/// Splits a label key into (domain prefix, base) at the first `/`.
fn split_key(key: &str) -> (&str, &str) {
    match key.split_once('/') {
        Some((prefix, base)) => (prefix, base),
        None => ("", key),
    }
}

/// Resolves one container's label map against the configured label prefix.
///
/// Keys iterate in sorted order, which makes "first" and "second" stable for
/// the conflict rules. Every key with an unrecognized base is reported.
pub fn resolve_labels(labels: &BTreeMap<String, String>, label_prefix: &str) -> ResolvedLabels {
    let mut resolved = ResolvedLabels::default();
    let mut unprefixed: BTreeMap<String, String> = BTreeMap::new();
    let mut prefixed: BTreeMap<String, String> = BTreeMap::new();
    let mut prefix_source: BTreeMap<String, String> = BTreeMap::new();

    for (key, value) in labels {
        let (prefix, base) = split_key(key);
        if !CLAIM_BASES.contains(&base) {
            resolved
                .issues
                .push(format!("label '{key}' has unrecognized base '{base}'"));
            continue;
        }
        if prefix.is_empty() {
            unprefixed.insert(base.to_owned(), value.clone());
            continue;
        }
        if !label_prefix.is_empty() && prefix != label_prefix {
            resolved.issues.push(format!(
                "label '{key}' ignored: prefix '{prefix}' does not match configured '{label_prefix}'"
            ));
            continue;
        }
        match prefix_source.get(base) {
            None => {
                prefixed.insert(base.to_owned(), value.clone());
                prefix_source.insert(base.to_owned(), prefix.to_owned());
            }
            Some(existing) => {
                // same-prefix duplicates cannot occur in a single-valued
                // label map, so this is always a cross-prefix conflict
                resolved.issues.push(format!(
                    "label '{key}' dropped: base '{base}' already set via prefix '{existing}'"
                ));
            }
        }
    }

    resolved.values = unprefixed;
    for (base, value) in prefixed {
        resolved.values.insert(base, value);
    }
    resolved
}

/// Builds a claim from resolved values. Returns `None` unless `s3.enabled`
/// is a case-insensitive `"true"` and a usable prefix remains after trimming.
pub fn claim_from_labels(values: &BTreeMap<String, String>) -> Option<ClaimSpec> {
    let enabled = values
        .get("s3.enabled")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    if !enabled {
        return None;
    }
    let prefix = values
        .get("s3.prefix")
        .map(|p| p.trim_matches('/').to_owned())
        .unwrap_or_default();
    if prefix.is_empty() {
        return None;
    }
    let field = |base: &str| values.get(base).cloned().unwrap_or_default();
    Some(ClaimSpec {
        enabled,
        bucket: field("s3.bucket"),
        prefix,
        class: field("s3.class"),
        reclaim: field("s3.reclaim"),
        access: field("s3.access"),
        args: field("s3.args"),
    })
}

impl Controller {
    /// Scans running peer containers and derives the set of claims for this
    /// reconcile. Duplicate prefixes across containers are kept; the
    /// provisioner is idempotent.
    pub async fn collect_claims(&self) -> Vec<ClaimSpec> {
        let filter = ListFilter {
            all: false,
            ..Default::default()
        };
        let containers = match self.runtime.list_containers(filter, SHORT_DEADLINE).await {
            Ok(list) => list,
            Err(err) => {
                warn!("could not list peer containers: {err}");
                return Vec::new();
            }
        };

        let mounter = self.mounter_name();
        let mut claims = Vec::new();
        for container in containers {
            if container.name == mounter {
                continue;
            }
            let resolved = resolve_labels(&container.labels, &self.cfg.label_prefix);
            for issue in &resolved.issues {
                if self.cfg.label_strict {
                    error!("container '{}': {issue}", container.name);
                } else {
                    warn!("container '{}': {issue}", container.name);
                }
            }
            if let Some(claim) = claim_from_labels(&resolved.values) {
                claims.push(claim);
            }
        }
        claims
    }
}
