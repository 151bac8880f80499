//! Release fixtures: a config rooted in a temp directory plus the wiring
//! to turn it into a coordinator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tagship_core::ReleaseVersion;
use tagship_core::config::ReleaseConfig;
use tagship_core::ports::{EnvironmentProvider, PackageIndex};
use tagship_publish::Publisher;
use tagship_runner::{BuildTaskRunner, HostEnvironmentProvider, RunnerConfig};
use tagship_scheduler::ReleaseCoordinator;
use tagship_secrets::{CredentialBroker, FileSecretStore};
use tempfile::TempDir;

pub const PACKAGE: &str = "mypkg";
pub const INDEX: &str = "pypi";
pub const TOKEN_IDENTITY: &str = "PYPI_TOKEN";
pub const TOKEN: &str = "pypi-AgEIcHlwaS5vcmc-test";

/// Three host targets sharing the index default identity.
pub const HOST_TARGETS: &str = r#"
  - arch: x86_64
    environment: { kind: host, toolchain_version: system }
    artifact: "mypkg-${{ version }}-${{ arch }}.whl"
  - arch: aarch64
    environment: { kind: host, toolchain_version: system }
    artifact: "mypkg-${{ version }}-${{ arch }}.whl"
  - arch: armv7
    environment: { kind: host, toolchain_version: system }
    artifact: "mypkg-${{ version }}-${{ arch }}.whl"
"#;

/// Toolchain script that writes the expected artifact for every target.
pub const BUILD_ALL: &str =
    "mkdir -p dist && printf \"wheel for $TAGSHIP_ARCH\" > dist/mypkg-$TAGSHIP_VERSION-$TAGSHIP_ARCH.whl";

/// Toolchain script that fails for `arch` and builds every other target.
pub fn build_failing_on(arch: &str) -> String {
    format!(
        "if [ \"$TAGSHIP_ARCH\" = \"{arch}\" ]; then echo 'error: linker `{arch}-linux-gnu-gcc` not found' >&2; exit 1; fi; {BUILD_ALL}"
    )
}

/// Toolchain script that hangs for `arch` and builds every other target.
pub fn build_hanging_on(arch: &str) -> String {
    format!("if [ \"$TAGSHIP_ARCH\" = \"{arch}\" ]; then sleep 30; fi; {BUILD_ALL}")
}

/// A release configuration and the directories it points at.
pub struct ReleaseHarness {
    root: TempDir,
    pub config: ReleaseConfig,
    pub secrets: HashMap<String, String>,
    providers: Vec<Arc<dyn EnvironmentProvider>>,
}

impl ReleaseHarness {
    pub fn new(script: &str) -> Self {
        Self::with_targets(script, HOST_TARGETS)
    }

    /// Build a harness from a YAML `targets` list.
    pub fn with_targets(script: &str, targets: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let yaml = format!(
            r#"
package: {PACKAGE}
tag:
  prefix: release-v
toolchain:
  program: sh
targets:{targets}
index:
  name: {INDEX}
  url: http://127.0.0.1:9/
  identity: {TOKEN_IDENTITY}
policy:
  build_timeout_secs: 60
  publish_timeout_secs: 30
  retry:
    max_attempts: 3
    base_delay_ms: 1
    max_delay_ms: 5
staging_dir: {staging}
"#,
            staging = root.path().join("staging").display()
        );

        let mut config = ReleaseConfig::from_yaml_str(&yaml).unwrap();
        config.toolchain.args = vec!["-c".to_string(), script.to_string()];

        Self {
            root,
            config,
            secrets: HashMap::from([(TOKEN_IDENTITY.to_string(), TOKEN.to_string())]),
            providers: Vec::new(),
        }
    }

    /// Register an extra environment provider, consulted after the host
    /// provider.
    pub fn with_provider(mut self, provider: Arc<dyn EnvironmentProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.path().join("work")
    }

    pub fn staging_dir(&self) -> &Path {
        &self.config.staging_dir
    }

    pub fn version(&self, version: &str) -> ReleaseVersion {
        ReleaseVersion::parse(version).unwrap()
    }

    /// Wire the real runner, broker and publisher around `index`.
    pub fn coordinator(&self, index: Arc<dyn PackageIndex>) -> ReleaseCoordinator {
        let config = Arc::new(self.config.clone());

        let mut runner = BuildTaskRunner::new(RunnerConfig::from(config.as_ref())).with_provider(
            Arc::new(HostEnvironmentProvider::new(self.work_dir(), self.root.path())),
        );
        for provider in &self.providers {
            runner = runner.with_provider(provider.clone());
        }

        let store = Arc::new(FileSecretStore::from_map(self.secrets.clone()));
        let broker = CredentialBroker::from_config(store, &config);
        let publisher = Publisher::new(index, config.policy.retry.clone());

        ReleaseCoordinator::new(config, Arc::new(runner), Arc::new(broker), Arc::new(publisher))
    }

    /// Files left in the staging directory.
    pub fn staged_files(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.push(path);
                }
            }
        }

        let mut files = Vec::new();
        walk(self.staging_dir(), &mut files);
        files.sort();
        files
    }

    /// Build workspaces that were not cleaned up.
    pub fn leftover_workspaces(&self) -> usize {
        std::fs::read_dir(self.work_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
