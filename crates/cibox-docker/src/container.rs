//! Container management

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerStateStatusEnum, HostConfig};
use bollard::Docker;
use futures::{future, StreamExt};
use cibox_core::StreamKind;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::decode::decode_frames;
use crate::error::{DockerError, Result};
use crate::service::{Container, ExecAttachment, ExecInspection};
use crate::types::{short_id, ContainerInfo, ContainerState, ExecSpec};

/// Grace period given to the container main process on stop
const STOP_TIMEOUT_SECS: i64 = 10;

/// Container specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Docker image to use
    pub image: String,

    /// Optional container name
    pub name: Option<String>,

    /// Main process; keeps the container alive while steps exec into it
    pub command: Vec<String>,

    /// Environment variables
    pub environment: HashMap<String, String>,

    /// Volume mounts
    pub volumes: Vec<VolumeMount>,

    /// Working directory
    pub working_dir: Option<String>,

    /// User to run as
    pub user: Option<String>,
}

/// Volume mount specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Host path
    pub host_path: PathBuf,

    /// Container path
    pub container_path: String,

    /// Read-only mount
    pub read_only: bool,
}

impl ContainerSpec {
    /// Create a new container specification
    pub fn new(image: String) -> Self {
        Self {
            image,
            name: None,
            command: vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()],
            environment: HashMap::new(),
            volumes: Vec::new(),
            working_dir: None,
            user: None,
        }
    }

    /// Set the container name
    pub fn with_name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    /// Replace the main process command
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Add environment variable
    pub fn with_env(mut self, key: String, value: String) -> Self {
        self.environment.insert(key, value);
        self
    }

    /// Add volume mount
    pub fn with_volume(mut self, mount: VolumeMount) -> Self {
        self.volumes.push(mount);
        self
    }

    /// Set working directory
    pub fn with_working_dir(mut self, dir: String) -> Self {
        self.working_dir = Some(dir);
        self
    }

    /// Set user
    pub fn with_user(mut self, user: String) -> Self {
        self.user = Some(user);
        self
    }

    /// Convert to Bollard container config
    pub fn to_container_config(&self) -> Config<String> {
        let mut env: Vec<String> =
            self.environment.iter().map(|(k, v)| format!("{k}={v}")).collect();
        env.sort();

        let mut config = Config {
            image: Some(self.image.clone()),
            cmd: if self.command.is_empty() { None } else { Some(self.command.clone()) },
            env: Some(env),
            working_dir: self.working_dir.clone(),
            user: self.user.clone(),
            ..Default::default()
        };

        if !self.volumes.is_empty() {
            let binds: Vec<String> = self
                .volumes
                .iter()
                .map(|v| {
                    format!(
                        "{}:{}{}",
                        v.host_path.display(),
                        v.container_path,
                        if v.read_only { ":ro" } else { "" }
                    )
                })
                .collect();

            config.host_config = Some(HostConfig { binds: Some(binds), ..Default::default() });
        }

        config
    }
}

/// Container manager for provisioning and removing containers
pub struct ContainerManager<'a> {
    client: &'a Docker,
}

impl<'a> ContainerManager<'a> {
    /// Create a new container manager
    pub fn new(client: &'a Docker) -> Self {
        Self { client }
    }

    /// Create and start a container
    pub async fn run(&self, spec: &ContainerSpec) -> Result<String> {
        let config = spec.to_container_config();
        let options = spec
            .name
            .as_ref()
            .map(|name| CreateContainerOptions { name: name.clone(), platform: None });

        let container = self.client.create_container(options, config).await?;

        let start = async {
            self.client.start_container::<String>(&container.id, None).await?;
            Ok::<_, DockerError>(())
        };
        start_or_cleanup(start, self.remove(&container.id, true)).await?;

        info!(container = %short_id(&container.id), image = %spec.image, "Started container");
        Ok(container.id)
    }

    /// Remove container
    pub async fn remove(&self, container_id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions { force, ..Default::default() };

        self.client.remove_container(container_id, Some(options)).await?;

        debug!(container = %short_id(container_id), "Removed container");
        Ok(())
    }
}

/// Await `start`; if it fails, run `cleanup` before returning the start error
async fn start_or_cleanup<S, C>(start: S, cleanup: C) -> Result<()>
where
    S: Future<Output = Result<()>>,
    C: Future<Output = Result<()>>,
{
    let err = match start.await {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    if let Err(cleanup_err) = cleanup.await {
        warn!("Failed to remove container that did not start: {}", cleanup_err);
    }
    Err(err)
}

/// A running Docker container that steps exec into
pub struct DockerContainer {
    client: Docker,
    id: String,
    span: tracing::Span,
}

impl DockerContainer {
    /// Wrap an already running container
    pub fn new(client: Docker, id: impl Into<String>) -> Self {
        let id = id.into();
        let span = tracing::info_span!("container", id = %short_id(&id));
        Self { client, id, span }
    }

    /// Force-remove the container
    pub async fn remove(&self) -> Result<()> {
        ContainerManager::new(&self.client).remove(&self.id, true).await
    }
}

#[async_trait]
impl Container for DockerContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn span(&self) -> tracing::Span {
        self.span.clone()
    }

    async fn create_exec(&self, spec: &ExecSpec) -> Result<String> {
        let options = CreateExecOptions {
            attach_stdin: Some(spec.attach_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(spec.command.clone()),
            env: if spec.env.is_empty() { None } else { Some(spec.env.clone()) },
            working_dir: spec.working_dir.clone(),
            user: spec.user.clone(),
            ..Default::default()
        };

        let exec = self.client.create_exec(&self.id, options).await?;
        Ok(exec.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ExecAttachment> {
        match self.client.start_exec(exec_id, None).await? {
            StartExecResults::Attached { output, input } => {
                let frames = output.filter_map(|result| {
                    future::ready(match result {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            Some(Ok((StreamKind::Stdout, message.to_vec())))
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            Some(Ok((StreamKind::Stderr, message.to_vec())))
                        }
                        Ok(LogOutput::StdIn { .. }) => None,
                        Err(e) => Some(Err(DockerError::Client(e))),
                    })
                });

                Ok(ExecAttachment { output: decode_frames(frames), input })
            }
            StartExecResults::Detached => {
                Err(DockerError::execution("Exec started in detached mode"))
            }
        }
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspection> {
        let inspect = self.client.inspect_exec(exec_id).await?;

        Ok(ExecInspection {
            exit_code: inspect.exit_code,
            running: inspect.running.unwrap_or(false),
        })
    }

    async fn stop(&self) -> Result<()> {
        let options = StopContainerOptions { t: STOP_TIMEOUT_SECS };

        self.client.stop_container(&self.id, Some(options)).await?;

        info!(container = %short_id(&self.id), "Stopped container");
        Ok(())
    }

    async fn state(&self) -> Result<ContainerInfo> {
        let inspect = self
            .client
            .inspect_container(&self.id, None::<InspectContainerOptions>)
            .await?;

        let state = match inspect.state {
            Some(state) => match state.status {
                Some(ContainerStateStatusEnum::CREATED) => ContainerState::Creating,
                Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
                Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
                Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
                Some(ContainerStateStatusEnum::REMOVING) => ContainerState::Removing,
                Some(ContainerStateStatusEnum::DEAD) => ContainerState::Dead,
                Some(ContainerStateStatusEnum::EXITED) => {
                    ContainerState::Exited(state.exit_code.unwrap_or(0))
                }
                _ => ContainerState::Unknown,
            },
            None => ContainerState::Unknown,
        };

        let config = inspect.config.unwrap_or_default();

        Ok(ContainerInfo {
            id: inspect.id.unwrap_or_else(|| self.id.clone()),
            name: inspect.name.unwrap_or_default().trim_start_matches('/').to_string(),
            image: config.image.unwrap_or_default(),
            state,
            created: inspect.created.unwrap_or_default(),
            labels: config.labels.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_spec_creation() {
        let spec = ContainerSpec::new("ubuntu:22.04".to_string())
            .with_name("cibox-build-1".to_string())
            .with_env("CI".to_string(), "true".to_string())
            .with_working_dir("/workspace".to_string());

        assert_eq!(spec.image, "ubuntu:22.04");
        assert_eq!(spec.command, vec!["tail", "-f", "/dev/null"]);
        assert!(spec.environment.contains_key("CI"));
        assert_eq!(spec.working_dir, Some("/workspace".to_string()));
        assert_eq!(spec.name.as_deref(), Some("cibox-build-1"));
    }

    #[tokio::test]
    async fn test_failed_start_removes_container() {
        let removed = std::sync::atomic::AtomicBool::new(false);
        let cleanup = async {
            removed.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok::<_, DockerError>(())
        };

        let start = async { Err::<(), _>(DockerError::execution("port in use")) };
        let err = start_or_cleanup(start, cleanup).await.unwrap_err();

        assert!(err.to_string().contains("port in use"));
        assert!(removed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_successful_start_keeps_container() {
        let removed = std::sync::atomic::AtomicBool::new(false);
        let cleanup = async {
            removed.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok::<_, DockerError>(())
        };

        start_or_cleanup(async { Ok::<_, DockerError>(()) }, cleanup).await.unwrap();

        assert!(!removed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_container_config_binds() {
        let spec = ContainerSpec::new("alpine:3".to_string())
            .with_env("B".to_string(), "2".to_string())
            .with_env("A".to_string(), "1".to_string())
            .with_volume(VolumeMount {
                host_path: PathBuf::from("/src"),
                container_path: "/workspace".to_string(),
                read_only: true,
            });

        let config = spec.to_container_config();
        assert_eq!(config.env, Some(vec!["A=1".to_string(), "B=2".to_string()]));
        let binds = config.host_config.and_then(|h| h.binds).unwrap();
        assert_eq!(binds, vec!["/src:/workspace:ro".to_string()]);
    }
}
