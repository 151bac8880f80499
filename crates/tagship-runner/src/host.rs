//! Build environments on the local host.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tagship_core::ports::{EnvironmentProvider, ExecOutput, ExecRequest, ExecutionEnvironment};
use tagship_core::target::{EnvironmentKind, EnvironmentSpec};
use tagship_core::{Error, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Variables passed through from the host process; everything else is cleared.
const INHERITED_VARS: &[&str] = &["PATH", "HOME", "LANG", "TMPDIR"];

/// Provider for `kind: host` targets.
///
/// Each acquisition gets a fresh directory under `work_root`, removed on
/// release. The source tree is read in place.
pub struct HostEnvironmentProvider {
    work_root: PathBuf,
    source_dir: PathBuf,
}

impl HostEnvironmentProvider {
    pub fn new(work_root: impl Into<PathBuf>, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
            source_dir: source_dir.into(),
        }
    }
}

#[async_trait]
impl EnvironmentProvider for HostEnvironmentProvider {
    fn supports(&self, kind: EnvironmentKind) -> bool {
        kind == EnvironmentKind::Host
    }

    async fn acquire(&self, spec: &EnvironmentSpec) -> Result<Box<dyn ExecutionEnvironment>> {
        let id = format!("tagship-host-{}", uuid::Uuid::new_v4());
        let workspace = self.work_root.join(&id);

        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| Error::Environment(format!("failed to create workspace: {}", e)))?;

        info!(
            environment = %id,
            workspace = %workspace.display(),
            toolchain_version = %spec.toolchain_version,
            "Acquired host environment"
        );

        Ok(Box::new(HostEnvironment {
            id,
            workspace,
            source_dir: self.source_dir.clone(),
        }))
    }

    async fn release(&self, environment: Box<dyn ExecutionEnvironment>) -> Result<()> {
        let workspace = environment.workspace().to_path_buf();
        match tokio::fs::remove_dir_all(&workspace).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Environment(format!(
                    "failed to remove workspace {}: {}",
                    workspace.display(),
                    e
                )));
            }
        }
        debug!(environment = %environment.id(), "Released host environment");
        Ok(())
    }
}

/// A workspace directory on the host.
pub struct HostEnvironment {
    id: String,
    workspace: PathBuf,
    source_dir: PathBuf,
}

#[async_trait]
impl ExecutionEnvironment for HostEnvironment {
    fn id(&self) -> &str {
        &self.id
    }

    fn workspace(&self) -> &Path {
        &self.workspace
    }

    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput> {
        let start = std::time::Instant::now();
        debug!(environment = %self.id, command = %request.command_line(), "Executing on host");

        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .current_dir(&self.workspace)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for name in INHERITED_VARS {
            if let Ok(value) = std::env::var(name) {
                command.env(name, value);
            }
        }
        command
            .env("TAGSHIP_SOURCE_DIR", &self.source_dir)
            .env("TAGSHIP_WORKSPACE", &self.workspace)
            .envs(&request.env);

        let output = command.output().await.map_err(|e| {
            Error::Environment(format!("failed to spawn '{}': {}", request.program, e))
        })?;

        // Killed by a signal.
        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code == -1 {
            warn!(environment = %self.id, "Process terminated without an exit code");
        }

        Ok(ExecOutput {
            exit_code: exit_code as i64,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
