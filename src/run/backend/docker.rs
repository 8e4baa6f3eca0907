//! Docker backend over the daemon API (bollard).
//!
//! CPU and memory reservations are enforced via the container host config.
//! Containers run detached; termination is observed by polling inspect.

use super::{ContainerBackend, ContainerSpec, ContainerStatus, RunHandle};
use crate::error::Error;
use async_trait::async_trait;
use bollard::container::{
    Config as CreateConfig, CreateContainerOptions, InspectContainerOptions,
    KillContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount as DockerMount, MountTypeEnum};
use bollard::Docker;
use futures_util::TryStreamExt;

pub struct DockerBackend;

impl Default for DockerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerBackend {
    pub fn new() -> Self {
        Self
    }

    fn connect() -> Result<Docker, Error> {
        Docker::connect_with_local_defaults()
            .map_err(|e| Error::runtime(format!("cannot connect to docker daemon: {}", e)))
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn prepare_image(&self, image: &str) -> Result<String, Error> {
        let client = Self::connect()?;
        if client.inspect_image(image).await.is_ok() {
            return Ok(image.to_string());
        }
        tracing::info!(target: "wdlrun::backend", image, "pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        client
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| Error::runtime(format!("cannot pull image {}: {}", image, e)))?;
        Ok(image.to_string())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<RunHandle, Error> {
        let client = Self::connect()?;

        let mounts: Vec<DockerMount> = spec
            .mounts
            .iter()
            .map(|m| DockerMount {
                typ: Some(MountTypeEnum::BIND),
                source: Some(m.host.display().to_string()),
                target: Some(m.container.display().to_string()),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let host_config = HostConfig {
            mounts: Some(mounts),
            nano_cpus: Some(spec.cpu as i64 * 1_000_000_000),
            memory: Some(spec.memory as i64),
            privileged: Some(spec.privileged),
            ..Default::default()
        };

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let create = CreateConfig {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.workdir.display().to_string()),
            env: Some(env),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = client
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                create,
            )
            .await
            .map_err(|e| Error::runtime(format!("cannot create container: {}", e)))?;

        client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::runtime(format!("cannot start container: {}", e)))?;

        Ok(RunHandle { id: created.id })
    }

    async fn poll(&self, handle: &RunHandle) -> Result<ContainerStatus, Error> {
        let client = Self::connect()?;
        let inspected = client
            .inspect_container(&handle.id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| Error::runtime(format!("cannot inspect container: {}", e)))?;
        let state = inspected
            .state
            .ok_or_else(|| Error::runtime("container has no state"))?;
        if state.running.unwrap_or(false) {
            return Ok(ContainerStatus::Running);
        }
        let code = state.exit_code.unwrap_or(-1);
        // Best-effort cleanup once the exit status is in hand.
        let _ = client
            .remove_container(
                &handle.id,
                Some(RemoveContainerOptions {
                    force: false,
                    ..Default::default()
                }),
            )
            .await;
        Ok(ContainerStatus::Exited(code))
    }

    async fn kill(&self, handle: &RunHandle) -> Result<(), Error> {
        let client = Self::connect()?;
        client
            .kill_container(&handle.id, Some(KillContainerOptions { signal: "SIGTERM" }))
            .await
            .map_err(|e| Error::runtime(format!("cannot kill container: {}", e)))?;
        Ok(())
    }
}
