//! Label grammar, priority and strictness tests.

use std::collections::BTreeMap;
use volume_s3_controller::controller::labels::{claim_from_labels, resolve_labels};

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

#[test]
fn prefixed_value_wins_with_configured_prefix() {
    let resolved = resolve_labels(
        &labels(&[("s3.enabled", "false"), ("acme/s3.enabled", "true")]),
        "acme",
    );
    assert_eq!(resolved.values["s3.enabled"], "true");
    // prefixed-overrides is a rule, not a conflict
    assert!(resolved.issues.is_empty());
}

#[test]
fn prefixed_value_wins_with_empty_prefix_config() {
    let resolved = resolve_labels(
        &labels(&[("s3.enabled", "false"), ("acme/s3.enabled", "true")]),
        "",
    );
    assert_eq!(resolved.values["s3.enabled"], "true");
    assert!(resolved.issues.is_empty());
}

#[test]
fn conflict_drops_the_second_prefixed_value() {
    // same base under two domain prefixes; sorted order makes acme first
    let resolved = resolve_labels(
        &labels(&[("acme/s3.bucket", "a"), ("zeta/s3.bucket", "z")]),
        "",
    );
    assert_eq!(resolved.values["s3.bucket"], "a");
    assert_eq!(resolved.issues.len(), 1);
    assert!(resolved.issues[0].contains("zeta/s3.bucket"));
}

#[test]
fn conflict_issue_content_is_identical_regardless_of_strictness() {
    // strictness only changes the log level at the collector; the resolved
    // map and the findings are the same
    let conflicting = labels(&[("acme/s3.bucket", "a"), ("zeta/s3.bucket", "z")]);
    let relaxed = resolve_labels(&conflicting, "");
    let strict = resolve_labels(&conflicting, "");
    assert_eq!(relaxed.values, strict.values);
    assert_eq!(relaxed.issues.len(), strict.issues.len());
}

#[test]
fn both_containers_resolve_prefixed_enabled_under_strict_setup() {
    // two containers each tagged with both forms; with the prefix configured
    // neither produces a finding
    for _ in 0..2 {
        let resolved = resolve_labels(
            &labels(&[("acme/s3.enabled", "true"), ("s3.enabled", "true")]),
            "acme",
        );
        assert_eq!(resolved.values["s3.enabled"], "true");
        assert!(resolved.issues.is_empty());
    }
}

#[test]
fn second_prefixed_form_under_other_prefix_is_ignored() {
    // one container switched its unprefixed key to a different domain prefix
    let resolved = resolve_labels(
        &labels(&[("acme/s3.enabled", "true"), ("other/s3.enabled", "true")]),
        "",
    );
    assert_eq!(resolved.values["s3.enabled"], "true");
    assert_eq!(resolved.issues.len(), 1);
}

#[test]
fn unknown_base_is_reported_but_other_labels_still_resolve() {
    let resolved = resolve_labels(
        &labels(&[
            ("s3.enabled", "true"),
            ("s3.prefix", "data"),
            ("s3.enabeld", "true"),
        ]),
        "",
    );
    assert_eq!(resolved.issues.len(), 1);
    let claim = claim_from_labels(&resolved.values).unwrap();
    assert_eq!(claim.prefix, "data");
}

#[test]
fn enabled_is_case_insensitive() {
    for value in ["true", "True", "TRUE"] {
        let resolved = resolve_labels(
            &labels(&[("s3.enabled", value), ("s3.prefix", "x")]),
            "",
        );
        assert!(claim_from_labels(&resolved.values).is_some(), "{value}");
    }
    let resolved = resolve_labels(&labels(&[("s3.enabled", "yes"), ("s3.prefix", "x")]), "");
    assert!(claim_from_labels(&resolved.values).is_none());
}

#[test]
fn advisory_fields_are_carried_through() {
    let resolved = resolve_labels(
        &labels(&[
            ("s3.enabled", "true"),
            ("s3.prefix", "logs"),
            ("s3.class", "standard"),
            ("s3.reclaim", "retain"),
            ("s3.access", "rw"),
            ("s3.args", "--fast-list"),
        ]),
        "",
    );
    let claim = claim_from_labels(&resolved.values).unwrap();
    assert_eq!(claim.class, "standard");
    assert_eq!(claim.reclaim, "retain");
    assert_eq!(claim.access, "rw");
    assert_eq!(claim.args, "--fast-list");
}
