//! Container backends.
//!
//! The task runtime drives containers through the [`ContainerBackend`]
//! capability: prepare an image, start a run, poll it, kill it. The docker
//! backend speaks the daemon API via bollard and enforces resource limits;
//! podman, singularity, and udocker shell out to their CLIs with advisory
//! limits.

pub mod cli;
pub mod docker;

use crate::error::Error;
use crate::run::config::Config;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// A bind mount into the container.
#[derive(Debug, Clone)]
pub struct Mount {
    pub host: PathBuf,
    pub container: PathBuf,
    pub read_only: bool,
}

/// Everything needed to start one task attempt's container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Unique name for this attempt (also used for container naming).
    pub name: String,
    /// Image reference as returned by `prepare_image`.
    pub image: String,
    /// In-container working directory (mounted from the host).
    pub workdir: PathBuf,
    pub mounts: Vec<Mount>,
    pub env: Vec<(String, String)>,
    /// argv executed inside the container.
    pub command: Vec<String>,
    pub cpu: u32,
    pub memory: u64,
    pub privileged: bool,
}

/// Opaque handle to a started container run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub id: String,
}

/// Poll result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Exited(i64),
}

#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Ensure `image` is available locally; may pull. Returns the reference
    /// `run` should use.
    async fn prepare_image(&self, image: &str) -> Result<String, Error>;

    async fn run(&self, spec: &ContainerSpec) -> Result<RunHandle, Error>;

    async fn poll(&self, handle: &RunHandle) -> Result<ContainerStatus, Error>;

    async fn kill(&self, handle: &RunHandle) -> Result<(), Error>;
}

/// Instantiate the configured backend.
pub fn create_backend(config: &Config) -> Result<Arc<dyn ContainerBackend>, Error> {
    match config.container.backend.as_str() {
        "docker" | "docker_swarm" => Ok(Arc::new(docker::DockerBackend::new())),
        "podman" => Ok(Arc::new(cli::CliBackend::new(cli::CliKind::Podman))),
        "singularity" => Ok(Arc::new(cli::CliBackend::new(cli::CliKind::Singularity))),
        "udocker" => Ok(Arc::new(cli::CliBackend::new(cli::CliKind::Udocker))),
        other => Err(Error::config(format!(
            "unsupported container backend: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_accepts_known_backends() {
        for name in ["docker", "docker_swarm", "podman", "singularity", "udocker"] {
            let mut c = Config::default();
            c.container.backend = name.to_string();
            assert!(create_backend(&c).is_ok(), "backend {}", name);
        }
        let mut c = Config::default();
        c.container.backend = "lxc".to_string();
        assert!(create_backend(&c).is_err());
    }
}
