//! # Docker Runtime Adapter
//!
//! [`ContainerRuntime`] implementation backed by the local Docker Engine API
//! via `bollard`. All calls run under the caller-supplied deadline; API
//! errors are folded into [`RuntimeError`] kinds so nothing bollard-specific
//! escapes this module.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    NetworkingConfig, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    DeviceMapping, EndpointSettings, HostConfig, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use super::{
    ContainerDetails, ContainerRuntime, ContainerSpec, ContainerSummary, EventStream, ExitStatus,
    ImageInfo, ListFilter, RestartMode, Result, RuntimeError, RuntimeEvent,
};

/// Docker Engine API client with per-call deadlines.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local daemon (unix socket or `DOCKER_HOST`).
    pub fn connect() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

fn classify(err: bollard::errors::Error) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message,
        } => RuntimeError::Conflict(message),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Api {
            status: status_code,
            message,
        },
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, bollard::errors::Error>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(classify(err)),
        Err(_) => Err(RuntimeError::Timeout(deadline)),
    }
}

fn summary_from(c: bollard::models::ContainerSummary) -> ContainerSummary {
    ContainerSummary {
        id: c.id.unwrap_or_default(),
        name: c
            .names
            .unwrap_or_default()
            .first()
            .map(|n| n.trim_start_matches('/').to_owned())
            .unwrap_or_default(),
        image: c.image.unwrap_or_default(),
        image_id: c.image_id.unwrap_or_default(),
        state: c.state.unwrap_or_default(),
        labels: c.labels.unwrap_or_default().into_iter().collect(),
    }
}

fn host_config_from(spec: &ContainerSpec) -> HostConfig {
    HostConfig {
        binds: if spec.binds.is_empty() {
            None
        } else {
            Some(spec.binds.clone())
        },
        cap_add: if spec.cap_add.is_empty() {
            None
        } else {
            Some(spec.cap_add.clone())
        },
        security_opt: if spec.security_opt.is_empty() {
            None
        } else {
            Some(spec.security_opt.clone())
        },
        devices: if spec.devices.is_empty() {
            None
        } else {
            Some(
                spec.devices
                    .iter()
                    .map(|d| DeviceMapping {
                        path_on_host: Some(d.host_path.clone()),
                        path_in_container: Some(d.container_path.clone()),
                        cgroup_permissions: Some(d.cgroup_permissions.clone()),
                    })
                    .collect(),
            )
        },
        privileged: spec.privileged.then_some(true),
        pid_mode: spec.pid_mode.clone(),
        network_mode: spec.network.clone(),
        restart_policy: match spec.restart {
            RestartMode::No => None,
            RestartMode::Always => Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::ALWAYS),
                maximum_retry_count: None,
            }),
        },
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self, deadline: Duration) -> Result<()> {
        with_deadline(deadline, self.docker.ping())
            .await
            .map(|_| ())
    }

    async fn list_containers(
        &self,
        filter: ListFilter,
        deadline: Duration,
    ) -> Result<Vec<ContainerSummary>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        if !filter.labels.is_empty() {
            filters.insert("label".to_owned(), filter.labels.clone());
        }
        if !filter.names.is_empty() {
            filters.insert("name".to_owned(), filter.names.clone());
        }
        let options = ListContainersOptions::<String> {
            all: filter.all,
            filters,
            ..Default::default()
        };
        let containers =
            with_deadline(deadline, self.docker.list_containers(Some(options))).await?;
        Ok(containers.into_iter().map(summary_from).collect())
    }

    async fn inspect_container(&self, id: &str, deadline: Duration) -> Result<ContainerDetails> {
        let inspect = with_deadline(
            deadline,
            self.docker
                .inspect_container(id, None::<InspectContainerOptions>),
        )
        .await?;
        let state = inspect.state.unwrap_or_default();
        Ok(ContainerDetails {
            id: inspect.id.unwrap_or_default(),
            name: inspect
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_owned(),
            image_ref: inspect.config.and_then(|c| c.image).unwrap_or_default(),
            image_id: inspect.image.unwrap_or_default(),
            state: state.status.map(|s| s.to_string()).unwrap_or_default(),
            running: state.running.unwrap_or(false),
            restarting: state.restarting.unwrap_or(false),
            exit_code: state.exit_code,
        })
    }

    async fn create_container(&self, spec: ContainerSpec, deadline: Duration) -> Result<String> {
        let host_config = host_config_from(&spec);
        let networking_config = spec.network.as_ref().map(|network| {
            let endpoint = EndpointSettings {
                aliases: if spec.network_aliases.is_empty() {
                    None
                } else {
                    Some(spec.network_aliases.clone())
                },
                ..Default::default()
            };
            NetworkingConfig {
                endpoints_config: HashMap::from([(network.clone(), endpoint)]),
            }
        });
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: if spec.cmd.is_empty() {
                None
            } else {
                Some(spec.cmd.clone())
            },
            entrypoint: spec.entrypoint.clone(),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            labels: if spec.labels.is_empty() {
                None
            } else {
                Some(spec.labels.clone().into_iter().collect())
            },
            host_config: Some(host_config),
            networking_config,
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response =
            with_deadline(deadline, self.docker.create_container(Some(options), config)).await?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str, deadline: Duration) -> Result<()> {
        with_deadline(
            deadline,
            self.docker
                .start_container(id, None::<StartContainerOptions<String>>),
        )
        .await
    }

    async fn remove_container(&self, id: &str, force: bool, deadline: Duration) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        with_deadline(deadline, self.docker.remove_container(id, Some(options))).await
    }

    async fn wait_container(&self, id: &str, deadline: Duration) -> Result<ExitStatus> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match tokio::time::timeout(deadline, stream.next()).await {
            Ok(Some(Ok(response))) => Ok(ExitStatus {
                status_code: response.status_code,
            }),
            // bollard surfaces a non-zero exit as an error variant carrying the code
            Ok(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => {
                Ok(ExitStatus { status_code: code })
            }
            Ok(Some(Err(err))) => Err(classify(err)),
            Ok(None) => Err(RuntimeError::Other(format!(
                "wait stream for {id} ended without a status"
            ))),
            Err(_) => Err(RuntimeError::Timeout(deadline)),
        }
    }

    async fn subscribe_events(&self, types: &[&str]) -> Result<EventStream> {
        let filters: HashMap<String, Vec<String>> = HashMap::from([(
            "type".to_owned(),
            types.iter().map(|t| (*t).to_owned()).collect(),
        )]);
        let options = EventsOptions::<String> {
            since: None,
            until: None,
            filters,
        };
        // the bollard stream borrows the client, so forward through a
        // channel to hand the caller an owned stream
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<RuntimeEvent>>(16);
        let docker = self.docker.clone();
        tokio::spawn(async move {
            let mut stream = docker.events(Some(options));
            while let Some(item) = stream.next().await {
                let mapped = item
                    .map(|message| RuntimeEvent {
                        kind: message.typ.map(|t| t.to_string()).unwrap_or_default(),
                        action: message.action.unwrap_or_default(),
                    })
                    .map_err(classify);
                if tx.send(mapped).await.is_err() {
                    break;
                }
            }
        });
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn inspect_image(&self, reference: &str, deadline: Duration) -> Result<ImageInfo> {
        let inspect = with_deadline(deadline, self.docker.inspect_image(reference)).await?;
        Ok(ImageInfo {
            id: inspect.id.unwrap_or_default(),
        })
    }

    async fn pull_image(&self, reference: &str, deadline: Duration) -> Result<()> {
        let pull = async {
            let options = CreateImageOptions {
                from_image: reference.to_owned(),
                ..Default::default()
            };
            let mut stream = self.docker.create_image(Some(options), None, None);
            while let Some(item) = stream.next().await {
                let info = item.map_err(classify)?;
                if let Some(error) = info.error {
                    return Err(RuntimeError::Other(format!(
                        "pull of {reference} failed: {error}"
                    )));
                }
            }
            Ok(())
        };
        match tokio::time::timeout(deadline, pull).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout(deadline)),
        }
    }
}
