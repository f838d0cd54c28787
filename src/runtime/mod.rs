//! # Container Runtime Abstraction
//!
//! Typed facade over the container runtime. Every operation takes an explicit
//! deadline, returns plain records (no client-library types leak to callers),
//! and classifies failures into [`RuntimeError`] kinds so the reconcile engine
//! can decide what is fatal and what is merely a warning.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub mod docker;

pub use docker::DockerRuntime;

/// Failure classification for runtime calls.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The named container or image does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Name or state conflict (e.g. a container with this name already exists).
    #[error("conflict: {0}")]
    Conflict(String),
    /// The per-call deadline elapsed.
    #[error("deadline exceeded after {0:?}")]
    Timeout(Duration),
    /// The runtime daemon is unreachable.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),
    /// The runtime rejected the request with an API error.
    #[error("runtime api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("{0}")]
    Other(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// One entry from a container listing.
#[derive(Debug, Clone, Default)]
pub struct ContainerSummary {
    pub id: String,
    /// Primary name with the leading `/` stripped.
    pub name: String,
    pub image: String,
    pub image_id: String,
    /// Runtime state string: `running`, `exited`, `created`, `restarting`, ...
    pub state: String,
    /// Sorted so label iteration order is deterministic.
    pub labels: BTreeMap<String, String>,
}

/// Inspect result for a single container.
#[derive(Debug, Clone, Default)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    /// Image reference from the container config (e.g. `rclone/rclone:latest`).
    pub image_ref: String,
    /// Resolved image id (`sha256:...`).
    pub image_id: String,
    pub state: String,
    pub running: bool,
    pub restarting: bool,
    pub exit_code: Option<i64>,
}

/// Restart policy for created containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartMode {
    #[default]
    No,
    Always,
}

/// Host device mapping (e.g. `/dev/fuse`).
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    pub host_path: String,
    pub container_path: String,
    pub cgroup_permissions: String,
}

/// Everything needed to create a container, runtime-neutral.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// `host:container[:opts]` bind specs.
    pub binds: Vec<String>,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    pub devices: Vec<DeviceSpec>,
    pub privileged: bool,
    /// `host` to join the host PID namespace.
    pub pid_mode: Option<String>,
    /// Network to attach at create time (defaults to the runtime's default).
    pub network: Option<String>,
    /// DNS aliases on the attached network.
    pub network_aliases: Vec<String>,
    pub restart: RestartMode,
}

/// Filter for [`ContainerRuntime::list_containers`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Include non-running containers.
    pub all: bool,
    /// Exact `key=value` label matches.
    pub labels: Vec<String>,
    /// Name substring filters (runtime-side semantics).
    pub names: Vec<String>,
}

/// Exit status from waiting on a container.
#[derive(Debug, Clone, Copy)]
pub struct ExitStatus {
    pub status_code: i64,
}

/// A runtime event relevant to reconciliation; contents are advisory, the
/// engine only uses arrival as a nudge.
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    pub kind: String,
    pub action: String,
}

pub type EventStream = BoxStream<'static, Result<RuntimeEvent>>;

/// Capability set the controller needs from a container runtime.
///
/// This is the one dynamic-dispatch seam: the engine and supervisor only ever
/// see this trait, which keeps every reconcile path testable against an
/// in-memory implementation.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ping(&self, deadline: Duration) -> Result<()>;

    async fn list_containers(
        &self,
        filter: ListFilter,
        deadline: Duration,
    ) -> Result<Vec<ContainerSummary>>;

    async fn inspect_container(&self, id: &str, deadline: Duration) -> Result<ContainerDetails>;

    /// Returns the new container id.
    async fn create_container(&self, spec: ContainerSpec, deadline: Duration) -> Result<String>;

    async fn start_container(&self, id: &str, deadline: Duration) -> Result<()>;

    async fn remove_container(&self, id: &str, force: bool, deadline: Duration) -> Result<()>;

    /// Waits until the container is no longer running.
    async fn wait_container(&self, id: &str, deadline: Duration) -> Result<ExitStatus>;

    /// Subscribes to runtime events of the given types (`container`,
    /// `service`, ...). The stream ends or yields an error when the
    /// connection drops; the caller reconnects.
    async fn subscribe_events(&self, types: &[&str]) -> Result<EventStream>;

    async fn inspect_image(&self, reference: &str, deadline: Duration) -> Result<ImageInfo>;

    /// Pulls an image, draining the progress stream.
    async fn pull_image(&self, reference: &str, deadline: Duration) -> Result<()>;
}

/// Inspect result for an image.
#[derive(Debug, Clone, Default)]
pub struct ImageInfo {
    pub id: String,
}
