//! Build task execution: one target, one version, one isolated environment.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tagship_core::config::{ReleaseConfig, ToolchainSpec};
use tagship_core::interpolation::InterpolationContext;
use tagship_core::ports::{EnvironmentProvider, ExecRequest, ExecutionEnvironment};
use tagship_core::release::{Artifact, BuildTask, FailureKind};
use tagship_core::{Arch, BuildTarget, ReleaseVersion};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Longest stderr tail kept in a failure's diagnostics.
const DIAGNOSTICS_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildFailureKind {
    EnvironmentAcquisition,
    /// The toolchain could not be started or exited non-zero.
    Toolchain,
    ArtifactValidation,
    Timeout,
}

impl std::fmt::Display for BuildFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", FailureKind::from(*self))
    }
}

impl From<BuildFailureKind> for FailureKind {
    fn from(kind: BuildFailureKind) -> Self {
        match kind {
            BuildFailureKind::EnvironmentAcquisition => FailureKind::EnvironmentAcquisition,
            BuildFailureKind::Toolchain => FailureKind::Toolchain,
            BuildFailureKind::ArtifactValidation => FailureKind::ArtifactValidation,
            BuildFailureKind::Timeout => FailureKind::Timeout,
        }
    }
}

/// Why a build task produced no artifact.
#[derive(Debug, Clone, Error)]
#[error("{kind} for {arch}: {message}")]
pub struct BuildFailure {
    pub arch: Arch,
    pub kind: BuildFailureKind,
    pub message: String,
    /// Tail of the toolchain's stderr, if it ran.
    pub diagnostics: String,
}

impl BuildFailure {
    pub fn new(arch: &Arch, kind: BuildFailureKind, message: impl Into<String>) -> Self {
        Self {
            arch: arch.clone(),
            kind,
            message: message.into(),
            diagnostics: String::new(),
        }
    }

    pub fn with_diagnostics(mut self, stderr: &str) -> Self {
        let start = stderr.len().saturating_sub(DIAGNOSTICS_LIMIT);
        let start = (start..stderr.len())
            .find(|i| stderr.is_char_boundary(*i))
            .unwrap_or(stderr.len());
        self.diagnostics = stderr[start..].to_string();
        self
    }
}

/// Builds one target for one version.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn run(
        &self,
        target: &BuildTarget,
        version: &ReleaseVersion,
    ) -> Result<Artifact, BuildFailure>;
}

/// Settings the runner takes from the deployment config.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub package: String,
    pub toolchain: ToolchainSpec,
    pub staging_dir: PathBuf,
    pub build_timeout: Duration,
}

impl From<&ReleaseConfig> for RunnerConfig {
    fn from(config: &ReleaseConfig) -> Self {
        Self {
            package: config.package.clone(),
            toolchain: config.toolchain.clone(),
            staging_dir: config.staging_dir.clone(),
            build_timeout: config.policy.build_timeout(),
        }
    }
}

/// Runs the toolchain inside an environment obtained from the first
/// provider that supports the target's environment kind.
///
/// The environment is released on every path out of [`BuildRunner::run`],
/// including timeouts.
pub struct BuildTaskRunner {
    config: RunnerConfig,
    providers: Vec<Arc<dyn EnvironmentProvider>>,
}

impl BuildTaskRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            providers: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn EnvironmentProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    fn provider_for(&self, target: &BuildTarget) -> Option<&Arc<dyn EnvironmentProvider>> {
        self.providers
            .iter()
            .find(|p| p.supports(target.environment.kind))
    }

    async fn build_in(
        &self,
        environment: &dyn ExecutionEnvironment,
        target: &BuildTarget,
        version: &ReleaseVersion,
    ) -> Result<Artifact, BuildFailure> {
        let arch = &target.arch;
        let ctx = InterpolationContext::for_target(&self.config.package, version, target);
        let render_failure =
            |e: tagship_core::Error| BuildFailure::new(arch, BuildFailureKind::Toolchain, e.to_string());

        let mut args = ctx
            .interpolate_all(&self.config.toolchain.args)
            .map_err(render_failure)?;
        args.extend(
            ctx.interpolate_all(&target.build_args)
                .map_err(render_failure)?,
        );
        let file_name = ctx.interpolate(&target.artifact).map_err(render_failure)?;

        let request = ExecRequest {
            program: self.config.toolchain.program.clone(),
            args,
            env: ctx.as_env(),
        };

        info!(arch = %arch, command = %request.command_line(), "Invoking toolchain");
        // The environment is already up, so a toolchain that cannot be
        // started is a toolchain failure rather than an acquisition one.
        let output = environment.exec(&request).await.map_err(|e| {
            BuildFailure::new(
                arch,
                BuildFailureKind::Toolchain,
                format!("failed to start toolchain: {}", e),
            )
        })?;

        if !output.success() {
            return Err(BuildFailure::new(
                arch,
                BuildFailureKind::Toolchain,
                format!("toolchain exited with code {}", output.exit_code),
            )
            .with_diagnostics(&output.stderr));
        }
        debug!(arch = %arch, duration_ms = output.duration_ms, "Toolchain finished");

        let output_dir = environment.workspace().join(&self.config.toolchain.output_dir);
        let produced = output_dir.join(&file_name);
        validate_artifact(arch, &produced).await?;
        warn_on_extra_outputs(arch, &output_dir, &file_name).await;

        let staged = self
            .config
            .staging_dir
            .join(version.canonical())
            .join(arch.as_str())
            .join(&file_name);
        let (checksum, size_bytes) = stage(&produced, &staged).await.map_err(|e| {
            BuildFailure::new(
                arch,
                BuildFailureKind::ArtifactValidation,
                format!("failed to stage {}: {}", file_name, e),
            )
        })?;

        Ok(Artifact {
            package: self.config.package.clone(),
            arch: arch.clone(),
            version: version.clone(),
            file_name,
            location: staged,
            checksum,
            size_bytes,
        })
    }
}

#[async_trait]
impl BuildRunner for BuildTaskRunner {
    async fn run(
        &self,
        target: &BuildTarget,
        version: &ReleaseVersion,
    ) -> Result<Artifact, BuildFailure> {
        let arch = &target.arch;
        let mut task = BuildTask::new(target.clone(), version.clone());

        info!(
            task_id = %task.id,
            arch = %arch,
            version = %version,
            environment = %target.environment.describe(),
            "Starting build task"
        );

        let Some(provider) = self.provider_for(target) else {
            let _ = task.fail();
            return Err(BuildFailure::new(
                arch,
                BuildFailureKind::EnvironmentAcquisition,
                format!("no provider for {} environments", target.environment.kind),
            ));
        };

        let environment = match provider.acquire(&target.environment).await {
            Ok(environment) => environment,
            Err(e) => {
                let _ = task.fail();
                error!(task_id = %task.id, arch = %arch, error = %e, "Environment acquisition failed");
                return Err(BuildFailure::new(
                    arch,
                    BuildFailureKind::EnvironmentAcquisition,
                    e.to_string(),
                ));
            }
        };

        if let Err(e) = task.start(environment.id()) {
            warn!(task_id = %task.id, error = %e, "Unexpected task state");
        }

        let budget = self.config.build_timeout;
        let result = match timeout(budget, self.build_in(environment.as_ref(), target, version)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(task_id = %task.id, arch = %arch, timeout_secs = budget.as_secs(), "Build timed out");
                Err(BuildFailure::new(
                    arch,
                    BuildFailureKind::Timeout,
                    format!("build exceeded {}s", budget.as_secs()),
                ))
            }
        };

        let environment_id = environment.id().to_string();
        if let Err(e) = provider.release(environment).await {
            warn!(task_id = %task.id, environment = %environment_id, error = %e, "Failed to release environment");
        }

        match &result {
            Ok(artifact) => {
                let _ = task.succeed();
                info!(
                    task_id = %task.id,
                    arch = %arch,
                    artifact = %artifact.file_name,
                    checksum = %artifact.checksum,
                    "Build task succeeded"
                );
            }
            Err(failure) => {
                let _ = task.fail();
                error!(task_id = %task.id, arch = %arch, kind = %failure.kind, error = %failure.message, "Build task failed");
            }
        }

        result
    }
}

async fn validate_artifact(arch: &Arch, path: &Path) -> Result<(), BuildFailure> {
    let metadata = tokio::fs::metadata(path).await.map_err(|_| {
        BuildFailure::new(
            arch,
            BuildFailureKind::ArtifactValidation,
            format!("expected artifact {} was not produced", path.display()),
        )
    })?;

    if !metadata.is_file() {
        return Err(BuildFailure::new(
            arch,
            BuildFailureKind::ArtifactValidation,
            format!("{} is not a regular file", path.display()),
        ));
    }
    if metadata.len() == 0 {
        return Err(BuildFailure::new(
            arch,
            BuildFailureKind::ArtifactValidation,
            format!("{} is empty", path.display()),
        ));
    }
    Ok(())
}

async fn warn_on_extra_outputs(arch: &Arch, output_dir: &Path, expected: &str) {
    let Ok(mut entries) = tokio::fs::read_dir(output_dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if name.to_string_lossy() != expected {
            warn!(arch = %arch, file = %name.to_string_lossy(), "Ignoring unexpected toolchain output");
        }
    }
}

/// Copy `from` to `to` and return the hex SHA-256 and size of the copy.
pub async fn stage(from: &Path, to: &Path) -> std::io::Result<(String, u64)> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, to).await?;
    checksum(to).await
}

/// Hex SHA-256 and size of a file.
pub async fn checksum(path: &Path) -> std::io::Result<(String, u64)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((hex::encode(hasher.finalize()), total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostEnvironmentProvider;
    use tagship_core::target::{EnvironmentKind, EnvironmentSpec};

    fn target(arch: &str, kind: EnvironmentKind) -> BuildTarget {
        BuildTarget {
            arch: Arch::new(arch),
            environment: EnvironmentSpec {
                kind,
                image: match kind {
                    EnvironmentKind::Container => Some("builder:1.0".to_string()),
                    EnvironmentKind::Host => None,
                },
                toolchain_version: "1.0".to_string(),
                platform: None,
            },
            build_args: vec![],
            artifact: "pkg-${{ version }}-${{ arch }}.whl".to_string(),
            identity: None,
        }
    }

    fn runner(root: &Path, script: &str, timeout_secs: u64) -> BuildTaskRunner {
        let config = RunnerConfig {
            package: "pkg".to_string(),
            toolchain: ToolchainSpec {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                output_dir: "dist".to_string(),
            },
            staging_dir: root.join("staging"),
            build_timeout: Duration::from_secs(timeout_secs),
        };
        BuildTaskRunner::new(config).with_provider(Arc::new(HostEnvironmentProvider::new(
            root.join("work"),
            root,
        )))
    }

    fn version() -> ReleaseVersion {
        ReleaseVersion::parse("2.3.0").unwrap()
    }

    fn workspaces_left(root: &Path) -> usize {
        std::fs::read_dir(root.join("work"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_successful_build_is_staged() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(
            root.path(),
            "mkdir -p dist && printf wheel > dist/pkg-$TAGSHIP_VERSION-$TAGSHIP_ARCH.whl",
            30,
        );

        let artifact = runner
            .run(&target("x86_64", EnvironmentKind::Host), &version())
            .await
            .unwrap();

        assert_eq!(artifact.file_name, "pkg-2.3.0-x86_64.whl");
        assert_eq!(artifact.size_bytes, 5);
        assert_eq!(
            artifact.location,
            root.path().join("staging/2.3.0/x86_64/pkg-2.3.0-x86_64.whl")
        );
        assert_eq!(std::fs::read(&artifact.location).unwrap(), b"wheel");
        let (expected, _) = checksum(&artifact.location).await.unwrap();
        assert_eq!(artifact.checksum, expected);
        assert_eq!(artifact.checksum.len(), 64);
        assert_eq!(workspaces_left(root.path()), 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_toolchain_failure() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(root.path(), "echo 'linker error' >&2; exit 2", 30);

        let failure = runner
            .run(&target("aarch64", EnvironmentKind::Host), &version())
            .await
            .unwrap_err();

        assert_eq!(failure.kind, BuildFailureKind::Toolchain);
        assert_eq!(failure.arch, Arch::new("aarch64"));
        assert!(failure.diagnostics.contains("linker error"));
        assert_eq!(workspaces_left(root.path()), 0);
    }

    #[tokio::test]
    async fn test_unstartable_toolchain_is_toolchain_failure() {
        let root = tempfile::tempdir().unwrap();
        let mut runner = runner(root.path(), "true", 30);
        runner.config.toolchain.program = "tagship-no-such-toolchain".to_string();

        let failure = runner
            .run(&target("x86_64", EnvironmentKind::Host), &version())
            .await
            .unwrap_err();

        assert_eq!(failure.kind, BuildFailureKind::Toolchain);
        assert!(failure.message.contains("failed to start toolchain"), "{}", failure.message);
        assert!(failure.message.contains("tagship-no-such-toolchain"), "{}", failure.message);
        assert_eq!(workspaces_left(root.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_validation_failure() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(root.path(), "mkdir -p dist && touch dist/wrong-name.whl", 30);

        let failure = runner
            .run(&target("x86_64", EnvironmentKind::Host), &version())
            .await
            .unwrap_err();

        assert_eq!(failure.kind, BuildFailureKind::ArtifactValidation);
        assert_eq!(workspaces_left(root.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_artifact_is_validation_failure() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(
            root.path(),
            "mkdir -p dist && touch dist/pkg-$TAGSHIP_VERSION-$TAGSHIP_ARCH.whl",
            30,
        );

        let failure = runner
            .run(&target("x86_64", EnvironmentKind::Host), &version())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, BuildFailureKind::ArtifactValidation);
    }

    #[tokio::test]
    async fn test_timeout_releases_environment() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(root.path(), "sleep 30", 1);

        let failure = runner
            .run(&target("x86_64", EnvironmentKind::Host), &version())
            .await
            .unwrap_err();

        assert_eq!(failure.kind, BuildFailureKind::Timeout);
        assert_eq!(workspaces_left(root.path()), 0);
    }

    #[tokio::test]
    async fn test_unsupported_environment_kind() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(root.path(), "true", 30);

        let failure = runner
            .run(&target("x86_64", EnvironmentKind::Container), &version())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, BuildFailureKind::EnvironmentAcquisition);
    }

    #[test]
    fn test_diagnostics_keep_tail() {
        let stderr = format!("{}END", "x".repeat(DIAGNOSTICS_LIMIT * 2));
        let failure = BuildFailure::new(&Arch::new("x86_64"), BuildFailureKind::Toolchain, "boom")
            .with_diagnostics(&stderr);
        assert_eq!(failure.diagnostics.len(), DIAGNOSTICS_LIMIT);
        assert!(failure.diagnostics.ends_with("END"));
    }

    #[test]
    fn test_failure_kind_names() {
        assert_eq!(
            FailureKind::from(BuildFailureKind::EnvironmentAcquisition).to_string(),
            "EnvironmentAcquisitionFailure"
        );
        assert_eq!(BuildFailureKind::Toolchain.to_string(), "ToolchainFailure");
    }
}
