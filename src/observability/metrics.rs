//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `volume_s3_reconcile_total` - Total reconcile passes
//! - `volume_s3_reconcile_errors_total` - Reconciles that hit a step failure
//! - `volume_s3_heal_attempts_total` - Lazy-unmount heals attempted
//! - `volume_s3_heal_success_total` - Heals after which the mount was writable again
//! - `volume_s3_orphan_cleanup_total` - Orphaned mounter containers removed
//! - `volume_s3_mounter_created_total` - Mounter containers created
//! - `volume_s3_mounter_running` - 1 when the managed mounter is running
//! - `volume_s3_mount_writable` - 1 when the last write probe succeeded
//! - `volume_s3_last_heal_success_unix` - Unix time of the last successful heal
//! - `volume_s3_last_reconcile_ms` - Wall time of the last reconcile pass
//!
//! The counters live in a per-controller [`Registry`] rather than process
//! globals so every test gets a fresh set. The reconcile task is the single
//! logical writer; the HTTP adapter only reads through [`Metrics::snapshot`].

use prometheus::{IntCounter, IntGauge, Registry};
use serde::Serialize;

pub struct Metrics {
    registry: Registry,
    pub reconcile_total: IntCounter,
    pub reconcile_errors: IntCounter,
    pub heal_attempts_total: IntCounter,
    pub heal_success_total: IntCounter,
    pub orphan_cleanup_total: IntCounter,
    pub mounter_created_total: IntCounter,
    pub mounter_running: IntGauge,
    pub mount_writable: IntGauge,
    pub last_heal_success_unix: IntGauge,
    pub last_reconcile_ms: IntGauge,
}

/// Value copy of every counter and gauge, served as `/status` JSON.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub reconcile_total: u64,
    pub reconcile_errors: u64,
    pub heal_attempts_total: u64,
    pub heal_success_total: u64,
    pub orphan_cleanup_total: u64,
    pub mounter_created_total: u64,
    pub mounter_running: i64,
    pub mount_writable: i64,
    pub last_heal_success_unix: i64,
    pub last_reconcile_ms: i64,
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("metric name and help are static and valid")
}

fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::new(name, help).expect("metric name and help are static and valid")
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let metrics = Self {
            reconcile_total: counter("volume_s3_reconcile_total", "Total reconcile passes"),
            reconcile_errors: counter(
                "volume_s3_reconcile_errors_total",
                "Reconciles that hit a step failure",
            ),
            heal_attempts_total: counter(
                "volume_s3_heal_attempts_total",
                "Lazy-unmount heals attempted",
            ),
            heal_success_total: counter(
                "volume_s3_heal_success_total",
                "Heals after which the mount was writable again",
            ),
            orphan_cleanup_total: counter(
                "volume_s3_orphan_cleanup_total",
                "Orphaned mounter containers removed",
            ),
            mounter_created_total: counter(
                "volume_s3_mounter_created_total",
                "Mounter containers created",
            ),
            mounter_running: gauge(
                "volume_s3_mounter_running",
                "1 when the managed mounter is running",
            ),
            mount_writable: gauge(
                "volume_s3_mount_writable",
                "1 when the last write probe succeeded",
            ),
            last_heal_success_unix: gauge(
                "volume_s3_last_heal_success_unix",
                "Unix time of the last successful heal",
            ),
            last_reconcile_ms: gauge(
                "volume_s3_last_reconcile_ms",
                "Wall time of the last reconcile pass in milliseconds",
            ),
            registry,
        };
        for collector in [
            &metrics.reconcile_total,
            &metrics.reconcile_errors,
            &metrics.heal_attempts_total,
            &metrics.heal_success_total,
            &metrics.orphan_cleanup_total,
            &metrics.mounter_created_total,
        ] {
            metrics
                .registry
                .register(Box::new(collector.clone()))
                .expect("metric registered once");
        }
        for collector in [
            &metrics.mounter_running,
            &metrics.mount_writable,
            &metrics.last_heal_success_unix,
            &metrics.last_reconcile_ms,
        ] {
            metrics
                .registry
                .register(Box::new(collector.clone()))
                .expect("metric registered once");
        }
        metrics
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reconcile_total: self.reconcile_total.get(),
            reconcile_errors: self.reconcile_errors.get(),
            heal_attempts_total: self.heal_attempts_total.get(),
            heal_success_total: self.heal_success_total.get(),
            orphan_cleanup_total: self.orphan_cleanup_total.get(),
            mounter_created_total: self.mounter_created_total.get(),
            mounter_running: self.mounter_running.get(),
            mount_writable: self.mount_writable.get(),
            last_heal_success_unix: self.last_heal_success_unix.get(),
            last_reconcile_ms: self.last_reconcile_ms.get(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
