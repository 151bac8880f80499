//! Deployment configuration.
//!
//! A deployment is described by one YAML file, loaded once at process start
//! and shared read-only (`Arc<ReleaseConfig>`) with every pipeline.

use crate::interpolation::InterpolationContext;
use crate::registry::TargetRegistry;
use crate::version::ReleaseVersion;
use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete, validated release configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReleaseConfig {
    /// Package name as known to the index.
    pub package: String,
    pub tag: TagPattern,
    pub toolchain: ToolchainSpec,
    #[schemars(with = "Vec<crate::target::BuildTarget>")]
    pub targets: TargetRegistry,
    pub index: IndexConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub policy: PipelinePolicy,
    /// Where built artifacts are staged between build and publish.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("tagship").join("staging")
}

/// Release tag convention: literal prefix followed by a semantic version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TagPattern {
    pub prefix: String,
    /// Accept versions with a pre-release component such as `-rc.1`.
    #[serde(default)]
    pub allow_prerelease: bool,
}

/// Toolchain command line shared by all targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ToolchainSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory, relative to the workspace, the toolchain writes into.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_output_dir() -> String {
    "dist".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IndexConfig {
    #[serde(default = "default_index_name")]
    pub name: String,
    pub url: String,
    /// Secret-store identity holding the upload token.
    pub identity: String,
    /// Username sent alongside the token.
    #[serde(default = "default_index_username")]
    pub username: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_index_name() -> String {
    "default".to_string()
}

fn default_index_username() -> String {
    "__token__".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// Where publish secrets come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum SecretsConfig {
    Env {
        #[serde(default)]
        prefix: Option<String>,
    },
    File {
        path: PathBuf,
    },
}

impl Default for SecretsConfig {
    fn default() -> Self {
        SecretsConfig::Env { prefix: None }
    }
}

/// Per-pipeline limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PipelinePolicy {
    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,
    #[serde(default = "default_credential_ttl")]
    pub credential_ttl_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_build_timeout() -> u64 {
    3600 // 1 hour
}

fn default_publish_timeout() -> u64 {
    600
}

fn default_credential_ttl() -> u64 {
    900
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            build_timeout_secs: default_build_timeout(),
            publish_timeout_secs: default_publish_timeout(),
            credential_ttl_secs: default_credential_ttl(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelinePolicy {
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn credential_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.credential_ttl_secs as i64)
    }
}

/// Bounded exponential backoff for transient upload failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RetryPolicy {
    /// Total upload attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    8000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay_ms`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

impl ReleaseConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load, parse and validate a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Check invariants not already enforced by the types.
    pub fn validate(&self) -> Result<()> {
        if self.package.trim().is_empty() {
            return Err(Error::InvalidConfig("package must not be empty".to_string()));
        }
        if self.tag.prefix.is_empty() {
            return Err(Error::InvalidConfig("tag.prefix must not be empty".to_string()));
        }
        if self.toolchain.program.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "toolchain.program must not be empty".to_string(),
            ));
        }
        if self.index.identity.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "index.identity must not be empty".to_string(),
            ));
        }
        if self.policy.retry.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "policy.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.policy.build_timeout_secs == 0 || self.policy.publish_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "pipeline timeouts must be positive".to_string(),
            ));
        }

        // Render every template once so placeholder typos fail at load time.
        let sample = ReleaseVersion::parse("0.0.0")?;
        for target in self.targets.list_targets() {
            let ctx = InterpolationContext::for_target(&self.package, &sample, target);
            ctx.interpolate_all(&self.toolchain.args)?;
            ctx.interpolate_all(&target.build_args)?;
            let name = ctx.interpolate(&target.artifact)?;
            if name.contains('/') || name.contains('\\') {
                return Err(Error::InvalidConfig(format!(
                    "target {}: artifact name must be a file name, got '{}'",
                    target.arch, target.artifact
                )));
            }
        }

        Ok(())
    }

    /// Secret identity used for a target's uploads.
    pub fn identity_for<'a>(&'a self, target: &'a crate::target::BuildTarget) -> &'a str {
        target.identity.as_deref().unwrap_or(&self.index.identity)
    }
}
