//! Observability support: prometheus metrics and the `/status` snapshot.

pub mod metrics;

pub use metrics::{Metrics, MetricsSnapshot};
