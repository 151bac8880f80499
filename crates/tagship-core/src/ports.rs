//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the release core and the
//! external collaborators: secret store, execution-environment provider and
//! package index.

use crate::credential::Credential;
use crate::release::Artifact;
use crate::target::{Arch, EnvironmentKind, EnvironmentSpec};
use crate::version::ReleaseVersion;
use crate::{IndexError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

/// Backing store for publish secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Look up a secret. `Ok(None)` means the store has no such entry.
    async fn get_secret(&self, identity: &str) -> Result<Option<Vec<u8>>>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// A command to run inside an execution environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl ExecRequest {
    /// Render as a single shell-like line for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of running a command in an execution environment.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A live, isolated environment owned by one build task.
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    /// Provider-specific identifier (container name, directory name).
    fn id(&self) -> &str;

    /// Host path of the workspace the toolchain writes into.
    fn workspace(&self) -> &Path;

    /// Run a command with the workspace as working directory.
    async fn exec(&self, request: &ExecRequest) -> Result<ExecOutput>;
}

/// Allocates and tears down execution environments.
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Whether this provider can satisfy the given environment kind.
    fn supports(&self, kind: EnvironmentKind) -> bool;

    async fn acquire(&self, spec: &EnvironmentSpec) -> Result<Box<dyn ExecutionEnvironment>>;

    async fn release(&self, environment: Box<dyn ExecutionEnvironment>) -> Result<()>;
}

/// The package index artifacts are published to.
#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// Index name used in credential scopes and logs.
    fn name(&self) -> &str;

    async fn exists(
        &self,
        package: &str,
        version: &ReleaseVersion,
        arch: &Arch,
    ) -> std::result::Result<bool, IndexError>;

    async fn upload(
        &self,
        artifact: &Artifact,
        credential: &Credential,
    ) -> std::result::Result<(), IndexError>;
}
