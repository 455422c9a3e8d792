use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::Docker;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::{OutputChunk, OutputStream, RuntimeClient, RuntimeError};

/// [`RuntimeClient`] backed by the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
    closed: AtomicBool,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon and checks it answers a ping.
    pub async fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            RuntimeError::docker_unavailable(format!(
                "failed to connect to Docker ({e}). Is Docker running?"
            ))
        })?;

        docker.ping().await.map_err(|e| {
            RuntimeError::docker_unavailable(format!(
                "cannot ping Docker daemon ({e}). Is Docker running?"
            ))
        })?;

        Ok(Self {
            docker,
            closed: AtomicBool::new(false),
        })
    }

    fn client(&self) -> Result<&Docker, RuntimeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RuntimeError::Closed);
        }
        Ok(&self.docker)
    }

    async fn image_exists_locally(&self, image: &str) -> Result<bool, RuntimeError> {
        let images = self
            .client()?
            .list_images(Some(ListImagesOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await
            .map_err(|e| RuntimeError::docker_unavailable(format!("failed to list images: {e}")))?;

        let wanted = image_ref(image);

        Ok(images.iter().any(|img| {
            img.repo_tags
                .iter()
                .any(|tag_str| image_ref(tag_str) == wanted)
        }))
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.image_exists_locally(image).await? {
            debug!(image, "Image present locally, skipping pull");
            return Ok(());
        }

        info!(image, "Pulling Docker image");
        let pull_options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.client()?.create_image(Some(pull_options), None, None);

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    if let Some(error) = output.error {
                        return Err(RuntimeError::image_not_found(format!("{image}: {error}")));
                    }
                    if let Some(status) = output.status {
                        debug!(image, status = status.trim(), "pull progress");
                    }
                }
                Err(e) => {
                    return Err(RuntimeError::image_not_found(format!("{image}: {e}")));
                }
            }
        }

        info!(image, "Image pulled");
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        image: &str,
        command: &[String],
    ) -> Result<String, RuntimeError> {
        let config = ContainerConfig {
            image: Some(image.to_string()),
            cmd: Some(command.to_vec()),
            tty: Some(false),
            ..Default::default()
        };

        let response = self
            .client()?
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| RuntimeError::container_failed("create", e.to_string()))?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.client()?
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::container_failed("start", e.to_string()))
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let t = i64::try_from(grace.as_secs()).unwrap_or(i64::MAX);
        self.client()?
            .stop_container(id, Some(StopContainerOptions { t }))
            .await
            .map_err(|e| RuntimeError::container_failed("stop", e.to_string()))
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        self.client()?
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| RuntimeError::container_failed("remove", e.to_string()))
    }

    async fn exec_create(&self, id: &str, command: Vec<String>) -> Result<String, RuntimeError> {
        let exec = self
            .client()?
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(command),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| RuntimeError::exec_failed("create", e.to_string()))?;

        Ok(exec.id)
    }

    async fn exec_attach(&self, exec_id: &str) -> Result<OutputStream, RuntimeError> {
        let started = self
            .client()?
            .start_exec(exec_id, None)
            .await
            .map_err(|e| RuntimeError::exec_failed("attach", e.to_string()))?;

        match started {
            StartExecResults::Attached { output, .. } => Ok(output
                .filter_map(|frame| async move {
                    match frame {
                        Ok(LogOutput::StdOut { message }) => Some(Ok(OutputChunk::Stdout(message))),
                        Ok(LogOutput::StdErr { message }) => Some(Ok(OutputChunk::Stderr(message))),
                        Ok(_) => None,
                        Err(e) => Some(Err(RuntimeError::exec_failed("stream", e.to_string()))),
                    }
                })
                .boxed()),
            StartExecResults::Detached => Err(RuntimeError::exec_failed(
                "attach",
                "exec started detached, no output stream",
            )),
        }
    }

    async fn exec_inspect(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError> {
        let inspect = self
            .client()?
            .inspect_exec(exec_id)
            .await
            .map_err(|e| RuntimeError::exec_failed("inspect", e.to_string()))?;

        if inspect.running == Some(true) {
            return Ok(None);
        }
        Ok(inspect.exit_code)
    }

    async fn close(&self) -> Result<(), RuntimeError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::Closed);
        }
        debug!("Docker client closed");
        Ok(())
    }
}

/// Parse image name and tag from a string.
fn parse_image_tag(image: &str) -> (&str, &str) {
    match image.rfind(':') {
        // A colon followed by a path segment belongs to a registry port.
        Some(colon_pos) if !image[colon_pos..].contains('/') => {
            let (name, tag) = image.split_at(colon_pos);
            (name, &tag[1..])
        }
        _ => (image, "latest"),
    }
}

/// Name and tag with the implicit Docker Hub registry and `library/`
/// namespace stripped, so `docker.io/library/python:3.11` equals `python:3.11`.
fn image_ref(image: &str) -> (&str, &str) {
    let (name, tag) = parse_image_tag(image);
    let name = ["docker.io/", "index.docker.io/", "registry-1.docker.io/"]
        .iter()
        .find_map(|registry| name.strip_prefix(registry))
        .unwrap_or(name);
    let name = name.strip_prefix("library/").unwrap_or(name);
    (name, tag)
}
