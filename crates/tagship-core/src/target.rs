//! Build target types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Architecture identifier, unique within a target registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Arch(String);

impl Arch {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Arch {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Kind of isolated execution environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    /// Fresh throwaway workspace on the host, for toolchains already pinned
    /// by the host image.
    Host,
    #[default]
    Container,
}

impl fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentKind::Host => write!(f, "host"),
            EnvironmentKind::Container => write!(f, "container"),
        }
    }
}

/// Pinned execution environment for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EnvironmentSpec {
    #[serde(default)]
    pub kind: EnvironmentKind,
    /// Container image reference. Must carry an explicit tag or digest.
    #[serde(default)]
    pub image: Option<String>,
    /// Toolchain version pinned for this target.
    pub toolchain_version: String,
    /// Container platform, e.g. `linux/arm64`.
    #[serde(default)]
    pub platform: Option<String>,
}

impl EnvironmentSpec {
    /// Check that the environment cannot drift between releases.
    pub fn pinning_problem(&self) -> Option<String> {
        if self.toolchain_version.trim().is_empty() {
            return Some("toolchain_version must not be empty".to_string());
        }

        match self.kind {
            EnvironmentKind::Host => None,
            EnvironmentKind::Container => match self.image.as_deref() {
                None | Some("") => Some("container environment requires an image".to_string()),
                Some(image) => image_pinning_problem(image),
            },
        }
    }

    /// Short description used in logs.
    pub fn describe(&self) -> String {
        match (&self.kind, &self.image) {
            (EnvironmentKind::Container, Some(image)) => {
                format!("container {} (toolchain {})", image, self.toolchain_version)
            }
            _ => format!("{} (toolchain {})", self.kind, self.toolchain_version),
        }
    }
}

fn image_pinning_problem(image: &str) -> Option<String> {
    if image.contains("@sha256:") {
        return None;
    }

    // The tag separator is the last ':' after the last '/', so registry
    // ports such as `localhost:5000/img` are not mistaken for tags.
    let name = image.rsplit('/').next().unwrap_or(image);
    match name.rsplit_once(':') {
        None => Some(format!("image '{}' has no tag or digest", image)),
        Some((_, "latest")) => Some(format!("image '{}' uses the floating 'latest' tag", image)),
        Some((_, "")) => Some(format!("image '{}' has an empty tag", image)),
        Some(_) => None,
    }
}

/// A statically defined build target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BuildTarget {
    pub arch: Arch,
    pub environment: EnvironmentSpec,
    /// Extra toolchain arguments for this target. Supports placeholders.
    #[serde(default)]
    pub build_args: Vec<String>,
    /// Artifact file name template, e.g. `mypkg-${{ version }}-${{ arch }}.whl`.
    pub artifact: String,
    /// Secret identity overriding the index default for this target.
    #[serde(default)]
    pub identity: Option<String>,
}
