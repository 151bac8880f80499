//! Build environments in Docker containers.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tagship_core::ports::{EnvironmentProvider, ExecOutput, ExecRequest, ExecutionEnvironment};
use tagship_core::target::{EnvironmentKind, EnvironmentSpec};
use tagship_core::{Error, Result};
use tracing::{debug, info, warn};

const WORKSPACE_MOUNT: &str = "/workspace";
const SOURCE_MOUNT: &str = "/src";

/// Provider for `kind: container` targets.
///
/// Every acquisition pulls the pinned image if it is missing, then starts a
/// long-lived container with a fresh host workspace bind-mounted at
/// `/workspace` and the source tree read-only at `/src`. The toolchain runs
/// through `docker exec`; release force-removes the container.
pub struct ContainerEnvironmentProvider {
    docker: Docker,
    work_root: PathBuf,
    source_dir: PathBuf,
}

impl ContainerEnvironmentProvider {
    /// Connect to the local Docker daemon.
    pub fn new(work_root: impl Into<PathBuf>, source_dir: impl Into<PathBuf>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Environment(format!("failed to connect to Docker: {}", e)))?;
        Ok(Self::with_docker(docker, work_root, source_dir))
    }

    /// Create with an existing Docker client.
    pub fn with_docker(
        docker: Docker,
        work_root: impl Into<PathBuf>,
        source_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            docker,
            work_root: work_root.into(),
            source_dir: source_dir.into(),
        }
    }

    async fn ensure_image(&self, image: &str, platform: Option<&str>) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image already present");
            return Ok(());
        }

        info!(image = %image, "Pulling build image");
        let options = CreateImageOptions {
            from_image: image,
            platform: platform.unwrap_or_default(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| Error::Environment(format!("failed to pull image {}: {}", image, e)))?;
        Ok(())
    }

    /// Hand workspace files written as root back to the invoking user so the
    /// host side can remove them.
    async fn restore_ownership(&self, container: &str, workspace: &Path) {
        let Ok(metadata) = tokio::fs::metadata(workspace).await else {
            return;
        };
        let owner = format!("{}:{}", metadata.uid(), metadata.gid());
        let request = ExecRequest {
            program: "chown".to_string(),
            args: vec!["-R".to_string(), owner, WORKSPACE_MOUNT.to_string()],
            env: Default::default(),
        };
        if let Err(e) = run_exec(&self.docker, container, &request).await {
            warn!(container = %container, error = %e, "Failed to restore workspace ownership");
        }
    }
}

#[async_trait]
impl EnvironmentProvider for ContainerEnvironmentProvider {
    fn supports(&self, kind: EnvironmentKind) -> bool {
        kind == EnvironmentKind::Container
    }

    async fn acquire(&self, spec: &EnvironmentSpec) -> Result<Box<dyn ExecutionEnvironment>> {
        let image = spec
            .image
            .as_deref()
            .ok_or_else(|| Error::Environment("container target has no image".to_string()))?;

        self.ensure_image(image, spec.platform.as_deref()).await?;

        let container_name = format!("tagship-{}", uuid::Uuid::new_v4());
        let workspace = self.work_root.join(&container_name);
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| Error::Environment(format!("failed to create workspace: {}", e)))?;

        let config = Config {
            image: Some(image.to_string()),
            entrypoint: Some(vec!["sleep".to_string()]),
            cmd: Some(vec!["infinity".to_string()]),
            working_dir: Some(WORKSPACE_MOUNT.to_string()),
            labels: Some(HashMap::from([(
                "tagship.managed".to_string(),
                "true".to_string(),
            )])),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(vec![
                    format!("{}:{}", workspace.display(), WORKSPACE_MOUNT),
                    format!("{}:{}:ro", self.source_dir.display(), SOURCE_MOUNT),
                ]),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: spec.platform.as_deref(),
        };

        let started = async {
            self.docker
                .create_container(Some(create_options), config)
                .await
                .map_err(|e| Error::Environment(format!("failed to create container: {}", e)))?;
            self.docker
                .start_container(&container_name, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| Error::Environment(format!("failed to start container: {}", e)))
        }
        .await;

        if let Err(e) = started {
            self.discard(&container_name, &workspace).await;
            return Err(e);
        }

        info!(
            container = %container_name,
            image = %image,
            toolchain_version = %spec.toolchain_version,
            "Acquired container environment"
        );

        Ok(Box::new(ContainerEnvironment {
            docker: self.docker.clone(),
            name: container_name,
            workspace,
        }))
    }

    async fn release(&self, environment: Box<dyn ExecutionEnvironment>) -> Result<()> {
        let container = environment.id().to_string();
        let workspace = environment.workspace().to_path_buf();

        self.restore_ownership(&container, &workspace).await;

        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        let removed = self
            .docker
            .remove_container(&container, Some(remove_options))
            .await;

        if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
            warn!(workspace = %workspace.display(), error = %e, "Failed to remove workspace");
        }

        removed.map_err(|e| {
            Error::Environment(format!("failed to remove container {}: {}", container, e))
        })?;

        debug!(container = %container, "Released container environment");
        Ok(())
    }
}

impl ContainerEnvironmentProvider {
    async fn discard(&self, container: &str, workspace: &Path) {
        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self
            .docker
            .remove_container(container, Some(remove_options))
            .await
        {
            debug!(container = %container, error = %e, "Nothing to remove");
        }
        let _ = tokio::fs::remove_dir_all(workspace).await;
    }
}

/// A running build container.
pub struct ContainerEnvironment {
    docker: Docker,
    name: String,
    workspace: PathBuf,
}

#[async_trait]
impl ExecutionEnvironment for ContainerEnvironment {
    fn id(&self) -> &str {
        &self.name
    }

    fn workspace(&self) -> &Path {
        &self.workspace
    }

    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput> {
        debug!(container = %self.name, command = %request.command_line(), "Executing in container");
        run_exec(&self.docker, &self.name, request).await
    }
}

async fn run_exec(docker: &Docker, container: &str, request: &ExecRequest) -> Result<ExecOutput> {
    let start = std::time::Instant::now();

    let cmd: Vec<String> = std::iter::once(request.program.clone())
        .chain(request.args.iter().cloned())
        .collect();
    let env: Vec<String> = [
        ("TAGSHIP_SOURCE_DIR", SOURCE_MOUNT),
        ("TAGSHIP_WORKSPACE", WORKSPACE_MOUNT),
    ]
    .iter()
    .map(|(k, v)| format!("{}={}", k, v))
    .chain(request.env.iter().map(|(k, v)| format!("{}={}", k, v)))
    .collect();

    let exec = docker
        .create_exec(
            container,
            CreateExecOptions {
                cmd: Some(cmd),
                env: Some(env),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                working_dir: Some(WORKSPACE_MOUNT.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| Error::Environment(format!("failed to create exec: {}", e)))?;

    let mut stdout = String::new();
    let mut stderr = String::new();

    match docker
        .start_exec(&exec.id, None)
        .await
        .map_err(|e| Error::Environment(format!("failed to start exec: {}", e)))?
    {
        StartExecResults::Attached { mut output, .. } => {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(Error::Environment(format!(
                            "lost exec output stream: {}",
                            e
                        )));
                    }
                }
            }
        }
        StartExecResults::Detached => {
            return Err(Error::Environment("exec started detached".to_string()));
        }
    }

    let inspect = docker
        .inspect_exec(&exec.id)
        .await
        .map_err(|e| Error::Environment(format!("failed to inspect exec: {}", e)))?;

    Ok(ExecOutput {
        exit_code: inspect.exit_code.unwrap_or(-1),
        stdout,
        stderr,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_release_removes_workspace_when_daemon_is_gone() {
        let root = tempfile::tempdir().unwrap();
        let docker = Docker::connect_with_unix(
            &root.path().join("docker.sock").to_string_lossy(),
            2,
            bollard::API_DEFAULT_VERSION,
        )
        .unwrap();
        let provider =
            ContainerEnvironmentProvider::with_docker(docker.clone(), root.path(), root.path());

        let workspace = root.path().join("tagship-gone");
        std::fs::create_dir_all(workspace.join("dist")).unwrap();
        std::fs::write(workspace.join("dist/pkg.whl"), b"wheel").unwrap();
        let environment = ContainerEnvironment {
            docker,
            name: "tagship-gone".to_string(),
            workspace: workspace.clone(),
        };

        let err = provider.release(Box::new(environment)).await.unwrap_err();

        assert!(err.to_string().contains("tagship-gone"), "{err}");
        assert!(!workspace.exists());
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon"]
    async fn test_container_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let provider = ContainerEnvironmentProvider::new(root.path(), root.path()).unwrap();
        let spec = EnvironmentSpec {
            kind: EnvironmentKind::Container,
            image: Some("alpine:3.20".to_string()),
            toolchain_version: "3.20".to_string(),
            platform: None,
        };

        let env = provider.acquire(&spec).await.unwrap();
        let workspace = env.workspace().to_path_buf();

        let output = env
            .exec(&ExecRequest {
                program: "sh".to_string(),
                args: vec![
                    "-c".to_string(),
                    "echo $TAGSHIP_ARCH > out.txt && cat out.txt".to_string(),
                ],
                env: BTreeMap::from([("TAGSHIP_ARCH".to_string(), "x86_64".to_string())]),
            })
            .await
            .unwrap();
        assert!(output.success(), "{}", output.stderr);
        assert_eq!(output.stdout.trim(), "x86_64");
        assert!(workspace.join("out.txt").is_file());

        provider.release(env).await.unwrap();
        assert!(!workspace.exists());
    }
}
