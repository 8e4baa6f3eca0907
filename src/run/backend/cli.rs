//! CLI-driven backends: podman, singularity, udocker.
//!
//! These spawn the respective command-line tool as a child process and
//! observe it with `try_wait`. Resource limits are advisory. Podman runs
//! under `sudo` (a passwordless sudoers entry is required); singularity can
//! only write under `/tmp` and the work directory; udocker provides no
//! isolation and mounts inputs writable.

use super::{ContainerBackend, ContainerSpec, ContainerStatus, RunHandle};
use crate::error::Error;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliKind {
    Podman,
    Singularity,
    Udocker,
}

pub struct CliBackend {
    kind: CliKind,
    children: Mutex<HashMap<String, Child>>,
}

impl CliBackend {
    pub fn new(kind: CliKind) -> Self {
        Self {
            kind,
            children: Mutex::new(HashMap::new()),
        }
    }

    fn run_command(&self, spec: &ContainerSpec) -> Command {
        match self.kind {
            CliKind::Podman => {
                let mut cmd = Command::new("sudo");
                cmd.arg("podman").arg("run").arg("--rm");
                cmd.arg("--workdir").arg(&spec.workdir);
                cmd.arg("--cpus").arg(spec.cpu.to_string());
                cmd.arg("--memory").arg(format!("{}b", spec.memory));
                if spec.privileged {
                    cmd.arg("--privileged");
                }
                for m in &spec.mounts {
                    cmd.arg("-v").arg(format!(
                        "{}:{}{}",
                        m.host.display(),
                        m.container.display(),
                        if m.read_only { ":ro" } else { "" }
                    ));
                }
                for (k, v) in &spec.env {
                    cmd.arg("-e").arg(format!("{}={}", k, v));
                }
                cmd.arg(&spec.image);
                cmd.args(&spec.command);
                cmd
            }
            CliKind::Singularity => {
                let mut cmd = Command::new("singularity");
                cmd.arg("exec").arg("--containall");
                cmd.arg("--pwd").arg(&spec.workdir);
                for m in &spec.mounts {
                    let mut bind = format!("{}:{}", m.host.display(), m.container.display());
                    if m.read_only {
                        bind.push_str(":ro");
                    }
                    cmd.arg("--bind").arg(bind);
                }
                for (k, v) in &spec.env {
                    cmd.arg("--env").arg(format!("{}={}", k, v));
                }
                cmd.arg(&spec.image);
                cmd.args(&spec.command);
                cmd
            }
            CliKind::Udocker => {
                let mut cmd = Command::new("udocker");
                cmd.arg("run").arg("--rm");
                cmd.arg(format!("--workdir={}", spec.workdir.display()));
                for m in &spec.mounts {
                    // No read-only bind support; inputs are writable.
                    cmd.arg(format!(
                        "--volume={}:{}",
                        m.host.display(),
                        m.container.display()
                    ));
                }
                for (k, v) in &spec.env {
                    cmd.arg(format!("--env={}={}", k, v));
                }
                cmd.arg(&spec.image);
                cmd.args(&spec.command);
                cmd
            }
        }
    }
}

#[async_trait]
impl ContainerBackend for CliBackend {
    async fn prepare_image(&self, image: &str) -> Result<String, Error> {
        match self.kind {
            CliKind::Podman => {
                let status = Command::new("sudo")
                    .args(["podman", "pull", image])
                    .stdout(Stdio::null())
                    .status()
                    .await
                    .map_err(|e| Error::runtime(format!("cannot run podman: {}", e)))?;
                if !status.success() {
                    return Err(Error::runtime(format!("podman pull {} failed", image)));
                }
                Ok(image.to_string())
            }
            // Singularity pulls docker-tagged images through its own
            // docker:// importer at exec time.
            CliKind::Singularity => Ok(format!("docker://{}", image)),
            CliKind::Udocker => {
                let status = Command::new("udocker")
                    .args(["pull", image])
                    .stdout(Stdio::null())
                    .status()
                    .await
                    .map_err(|e| Error::runtime(format!("cannot run udocker: {}", e)))?;
                if !status.success() {
                    return Err(Error::runtime(format!("udocker pull {} failed", image)));
                }
                Ok(image.to_string())
            }
        }
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<RunHandle, Error> {
        let mut cmd = self.run_command(spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd
            .spawn()
            .map_err(|e| Error::runtime(format!("cannot spawn container process: {}", e)))?;
        let id = format!("{}-{}", spec.name, uuid::Uuid::new_v4().simple());
        self.children.lock().await.insert(id.clone(), child);
        Ok(RunHandle { id })
    }

    async fn poll(&self, handle: &RunHandle) -> Result<ContainerStatus, Error> {
        let mut children = self.children.lock().await;
        let child = children
            .get_mut(&handle.id)
            .ok_or_else(|| Error::runtime(format!("unknown container run {}", handle.id)))?;
        match child
            .try_wait()
            .map_err(|e| Error::runtime(format!("cannot poll container process: {}", e)))?
        {
            None => Ok(ContainerStatus::Running),
            Some(status) => {
                children.remove(&handle.id);
                Ok(ContainerStatus::Exited(status.code().unwrap_or(-1) as i64))
            }
        }
    }

    async fn kill(&self, handle: &RunHandle) -> Result<(), Error> {
        let mut children = self.children.lock().await;
        if let Some(child) = children.get_mut(&handle.id) {
            child
                .start_kill()
                .map_err(|e| Error::runtime(format!("cannot kill container process: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "t".to_string(),
            image: "ubuntu:22.04".to_string(),
            workdir: PathBuf::from("/work"),
            mounts: vec![super::super::Mount {
                host: PathBuf::from("/host/in"),
                container: PathBuf::from("/mnt/in"),
                read_only: true,
            }],
            env: vec![("K".to_string(), "v".to_string())],
            command: vec!["bash".to_string(), "-c".to_string(), "true".to_string()],
            cpu: 2,
            memory: 1 << 30,
            privileged: false,
        }
    }

    fn argv(cmd: &Command) -> Vec<String> {
        let std = cmd.as_std();
        std::iter::once(std.get_program().to_string_lossy().into_owned())
            .chain(std.get_args().map(|a| a.to_string_lossy().into_owned()))
            .collect()
    }

    #[test]
    fn podman_command_shape() {
        let backend = CliBackend::new(CliKind::Podman);
        let args = argv(&backend.run_command(&spec()));
        assert_eq!(args[0], "sudo");
        assert_eq!(args[1], "podman");
        assert!(args.contains(&"/host/in:/mnt/in:ro".to_string()));
        assert!(args.contains(&"K=v".to_string()));
    }

    #[test]
    fn singularity_uses_docker_import() {
        let backend = CliBackend::new(CliKind::Singularity);
        let args = argv(&backend.run_command(&spec()));
        assert_eq!(args[0], "singularity");
        assert!(args.contains(&"--bind".to_string()));
    }

    #[test]
    fn udocker_mounts_are_writable() {
        let backend = CliBackend::new(CliKind::Udocker);
        let args = argv(&backend.run_command(&spec()));
        assert!(args.iter().any(|a| a == "--volume=/host/in:/mnt/in"));
        assert!(!args.iter().any(|a| a.ends_with(":ro")));
    }
}
