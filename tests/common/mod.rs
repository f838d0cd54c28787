//! In-memory [`ContainerRuntime`] used by the scenario tests. Keeps a map of
//! containers and images, records every mutating call, and lets a test
//! inject start failures or side effects (e.g. "the unmount helper freed the
//! mountpoint").

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use volume_s3_controller::config::Config;
use volume_s3_controller::controller::Controller;
use volume_s3_controller::runtime::{
    ContainerDetails, ContainerRuntime, ContainerSpec, ContainerSummary, EventStream, ExitStatus,
    ImageInfo, ListFilter, Result, RuntimeError,
};

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub state: String,
    pub image_id: String,
}

#[derive(Default)]
pub struct MockState {
    pub containers: BTreeMap<String, MockContainer>,
    /// image reference -> image id
    pub images: BTreeMap<String, String>,
    /// recorded mutating calls, e.g. `create:rclone-mounter-host`
    pub calls: Vec<String>,
    pub created_specs: Vec<ContainerSpec>,
    /// names whose next N starts fail
    pub fail_start: BTreeMap<String, u32>,
    pub wait_exit_code: i64,
    next_id: u64,
}

type StartHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct MockRuntime {
    pub state: Mutex<MockState>,
    pub on_start: Mutex<Option<StartHook>>,
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        let runtime = Self::default();
        runtime
            .state
            .lock()
            .unwrap()
            .images
            .insert("rclone/rclone:latest".to_owned(), "sha256:rclone-a".to_owned());
        runtime
            .state
            .lock()
            .unwrap()
            .images
            .insert("helper:latest".to_owned(), "sha256:helper-a".to_owned());
        Arc::new(runtime)
    }

    pub fn add_container(&self, name: &str, labels: &[(&str, &str)], state: &str, image_id: &str) {
        let mut guard = self.state.lock().unwrap();
        guard.next_id += 1;
        let id = format!("id-{}", guard.next_id);
        let spec = ContainerSpec {
            name: name.to_owned(),
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            ..Default::default()
        };
        guard.containers.insert(
            name.to_owned(),
            MockContainer {
                id,
                spec,
                state: state.to_owned(),
                image_id: image_id.to_owned(),
            },
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn container(&self, name: &str) -> Option<MockContainer> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().created_specs.clone()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self, _deadline: Duration) -> Result<()> {
        Ok(())
    }

    async fn list_containers(
        &self,
        filter: ListFilter,
        _deadline: Duration,
    ) -> Result<Vec<ContainerSummary>> {
        let guard = self.state.lock().unwrap();
        let mut out = Vec::new();
        for container in guard.containers.values() {
            if !filter.all && container.state != "running" {
                continue;
            }
            if !filter.names.is_empty()
                && !filter.names.iter().any(|n| container.spec.name.contains(n.as_str()))
            {
                continue;
            }
            let label_match = filter.labels.iter().all(|pair| {
                pair.split_once('=').is_some_and(|(k, v)| {
                    container.spec.labels.get(k).map(String::as_str) == Some(v)
                })
            });
            if !label_match {
                continue;
            }
            out.push(ContainerSummary {
                id: container.id.clone(),
                name: container.spec.name.clone(),
                image: container.spec.image.clone(),
                image_id: container.image_id.clone(),
                state: container.state.clone(),
                labels: container.spec.labels.clone(),
            });
        }
        Ok(out)
    }

    async fn inspect_container(&self, id: &str, _deadline: Duration) -> Result<ContainerDetails> {
        let guard = self.state.lock().unwrap();
        let container = guard
            .containers
            .values()
            .find(|c| c.spec.name == id || c.id == id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
        Ok(ContainerDetails {
            id: container.id.clone(),
            name: container.spec.name.clone(),
            image_ref: container.spec.image.clone(),
            image_id: container.image_id.clone(),
            state: container.state.clone(),
            running: container.state == "running",
            restarting: container.state == "restarting",
            exit_code: None,
        })
    }

    async fn create_container(&self, spec: ContainerSpec, _deadline: Duration) -> Result<String> {
        let mut guard = self.state.lock().unwrap();
        if guard.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Conflict(format!(
                "container name {} in use",
                spec.name
            )));
        }
        guard.next_id += 1;
        let id = format!("id-{}", guard.next_id);
        let image_id = guard
            .images
            .get(&spec.image)
            .cloned()
            .unwrap_or_else(|| "sha256:unknown".to_owned());
        guard.calls.push(format!("create:{}", spec.name));
        guard.created_specs.push(spec.clone());
        guard.containers.insert(
            spec.name.clone(),
            MockContainer {
                id: id.clone(),
                spec,
                state: "created".to_owned(),
                image_id,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str, _deadline: Duration) -> Result<()> {
        let name = {
            let mut guard = self.state.lock().unwrap();
            let name = guard
                .containers
                .values()
                .find(|c| c.spec.name == id || c.id == id)
                .map(|c| c.spec.name.clone())
                .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
            if let Some(remaining) = guard.fail_start.get_mut(&name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RuntimeError::Other(format!("start of {name} failed")));
                }
            }
            guard.calls.push(format!("start:{name}"));
            if let Some(container) = guard.containers.get_mut(&name) {
                container.state = "running".to_owned();
            }
            name
        };
        if let Some(hook) = self.on_start.lock().unwrap().as_ref() {
            hook(&name);
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool, _deadline: Duration) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let name = guard
            .containers
            .values()
            .find(|c| c.spec.name == id || c.id == id)
            .map(|c| c.spec.name.clone())
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
        guard.containers.remove(&name);
        guard.calls.push(format!("remove:{name}"));
        Ok(())
    }

    async fn wait_container(&self, id: &str, _deadline: Duration) -> Result<ExitStatus> {
        let mut guard = self.state.lock().unwrap();
        let name = guard
            .containers
            .values()
            .find(|c| c.spec.name == id || c.id == id)
            .map(|c| c.spec.name.clone())
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
        if let Some(container) = guard.containers.get_mut(&name) {
            container.state = "exited".to_owned();
        }
        guard.calls.push(format!("wait:{name}"));
        Ok(ExitStatus {
            status_code: guard.wait_exit_code,
        })
    }

    async fn subscribe_events(&self, _types: &[&str]) -> Result<EventStream> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn inspect_image(&self, reference: &str, _deadline: Duration) -> Result<ImageInfo> {
        let guard = self.state.lock().unwrap();
        guard
            .images
            .get(reference)
            .map(|id| ImageInfo { id: id.clone() })
            .ok_or_else(|| RuntimeError::NotFound(format!("no such image: {reference}")))
    }

    async fn pull_image(&self, reference: &str, _deadline: Duration) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(format!("pull:{reference}"));
        if !guard.images.contains_key(reference) {
            guard
                .images
                .insert(reference.to_owned(), format!("sha256:pulled-{reference}"));
        }
        Ok(())
    }
}

/// A controller wired to a fresh mock runtime, plus the nudge receiver.
pub fn controller_with(
    cfg: Config,
    runtime: Arc<MockRuntime>,
) -> (Arc<Controller>, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (Arc::new(Controller::new(cfg, runtime, tx)), rx)
}

/// Base test configuration: tempdir mountpoint, fixed helper image, no
/// remote auto-creation.
pub fn test_config(mountpoint: &std::path::Path) -> Config {
    Config {
        mountpoint: mountpoint.to_str().unwrap().to_owned(),
        helper_image: "helper:latest".to_owned(),
        access_key: "test-access".to_owned(),
        secret_key: "test-secret".to_owned(),
        auto_create_bucket: false,
        auto_create_prefix: false,
        ..Config::default()
    }
}
