//! Static registry of build targets.

use crate::target::{Arch, BuildTarget};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered, immutable list of build targets.
///
/// Construction enforces the registry invariants, so a value of this type
/// always has at least one target, unique architectures and pinned
/// environments. Order only affects display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<BuildTarget>", into = "Vec<BuildTarget>")]
pub struct TargetRegistry {
    targets: Vec<BuildTarget>,
}

impl TargetRegistry {
    pub fn new(targets: Vec<BuildTarget>) -> Result<Self> {
        if targets.is_empty() {
            return Err(Error::InvalidConfig(
                "target registry must define at least one target".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for target in &targets {
            if target.arch.as_str().trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "target architecture must not be empty".to_string(),
                ));
            }
            if !seen.insert(target.arch.clone()) {
                return Err(Error::DuplicateArch(target.arch.to_string()));
            }
            if let Some(problem) = target.environment.pinning_problem() {
                return Err(Error::InvalidConfig(format!(
                    "target {}: {}",
                    target.arch, problem
                )));
            }
            if target.artifact.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "target {}: artifact name must not be empty",
                    target.arch
                )));
            }
        }

        Ok(Self { targets })
    }

    /// All targets in registry order.
    pub fn list_targets(&self) -> &[BuildTarget] {
        &self.targets
    }

    pub fn get(&self, arch: &Arch) -> Option<&BuildTarget> {
        self.targets.iter().find(|t| &t.arch == arch)
    }

    pub fn architectures(&self) -> Vec<Arch> {
        self.targets.iter().map(|t| t.arch.clone()).collect()
    }

    /// Targets restricted to `only`, in registry order. An empty filter
    /// selects every target.
    pub fn select(&self, only: &[Arch]) -> Result<Vec<BuildTarget>> {
        if only.is_empty() {
            return Ok(self.targets.clone());
        }

        if let Some(unknown) = only.iter().find(|arch| self.get(arch).is_none()) {
            return Err(Error::UnknownArch(unknown.to_string()));
        }

        Ok(self
            .targets
            .iter()
            .filter(|t| only.contains(&t.arch))
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl TryFrom<Vec<BuildTarget>> for TargetRegistry {
    type Error = Error;

    fn try_from(targets: Vec<BuildTarget>) -> Result<Self> {
        Self::new(targets)
    }
}

impl From<TargetRegistry> for Vec<BuildTarget> {
    fn from(registry: TargetRegistry) -> Self {
        registry.targets
    }
}
