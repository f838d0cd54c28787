//! # volume-s3-controller
//!
//! Per-node reconciling controller that keeps a host-level FUSE mount of an
//! S3-compatible object store healthy and provisions "volume-like"
//! sub-prefixes for sibling containers.
//!
//! ## Overview
//!
//! One controller runs per host. Each reconcile pass:
//!
//! 1. **Fixes mount propagation** - marks the mountpoint rshared in the host
//!    namespace via a one-shot privileged helper
//! 2. **Supervises the mounter** - keeps exactly one `rclone mount`
//!    container (named by host identity) running on the desired image
//! 3. **Heals stuck mounts** - write-probes the mountpoint and lazily
//!    unmounts it when the FUSE daemon has wedged
//! 4. **Collects claims** - reads `s3.*` labels from running peer containers
//! 5. **Provisions prefixes** - creates buckets/prefixes remotely and the
//!    matching directories under the mountpoint
//! 6. **Reaps orphans** - removes managed mounter containers that are no
//!    longer alive
//!
//! A depth-1 nudge channel coalesces runtime events into at most one early
//! reconcile. The HTTP surface exposes probes, a JSON status snapshot and
//! prometheus metrics.

pub mod cli;
pub mod config;
pub mod controller;
pub mod observability;
pub mod runtime;
pub mod server;
