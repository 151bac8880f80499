//! Release, build task, artifact and outcome types.

use crate::ids::{ReleaseId, TaskId};
use crate::target::{Arch, BuildTarget};
use crate::version::ReleaseVersion;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// A pushed reference delivered by the event trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEvent {
    pub reference: String,
    pub timestamp: DateTime<Utc>,
}

impl ReleaseEvent {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle of one release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseState {
    Triggered,
    Dispatched,
    Aggregating,
    Finalized,
}

impl ReleaseState {
    pub fn can_transition_to(&self, next: ReleaseState) -> bool {
        matches!(
            (self, next),
            (ReleaseState::Triggered, ReleaseState::Dispatched)
                | (ReleaseState::Dispatched, ReleaseState::Aggregating)
                | (ReleaseState::Aggregating, ReleaseState::Finalized)
        )
    }

    /// Move to `next`, rejecting skipped or backward steps.
    pub fn advance(&mut self, next: ReleaseState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: format!("{:?}", self),
                to: format!("{:?}", next),
            });
        }
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Succeeded)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }
}

/// One build of one target for one release.
///
/// `Pending -> Failed` is allowed for builds whose environment could not be
/// acquired.
#[derive(Debug, Clone)]
pub struct BuildTask {
    pub id: TaskId,
    pub target: BuildTarget,
    pub version: ReleaseVersion,
    pub environment_id: Option<String>,
    status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl BuildTask {
    pub fn new(target: BuildTarget, version: ReleaseVersion) -> Self {
        Self {
            id: TaskId::new(),
            target,
            version,
            environment_id: None,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn start(&mut self, environment_id: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        self.environment_id = Some(environment_id.into());
        Ok(())
    }

    pub fn succeed(&mut self) -> Result<()> {
        self.transition(TaskStatus::Succeeded)
    }

    pub fn fail(&mut self) -> Result<()> {
        self.transition(TaskStatus::Failed)
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", next),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// A built distribution file waiting to be published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub package: String,
    pub arch: Arch,
    pub version: ReleaseVersion,
    pub file_name: String,
    /// Staged copy outside the execution environment.
    pub location: PathBuf,
    /// Hex-encoded SHA-256 of the file content.
    pub checksum: String,
    pub size_bytes: u64,
}

/// Classification of a failed target, following the release error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    EnvironmentAcquisition,
    Toolchain,
    ArtifactValidation,
    CredentialUnavailable,
    PublishTransient,
    PublishAuth,
    PublishRejected,
    Timeout,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::EnvironmentAcquisition => "EnvironmentAcquisitionFailure",
            FailureKind::Toolchain => "ToolchainFailure",
            FailureKind::ArtifactValidation => "ArtifactValidationFailure",
            FailureKind::CredentialUnavailable => "CredentialUnavailable",
            FailureKind::PublishTransient => "PublishTransientFailure",
            FailureKind::PublishAuth => "PublishAuthFailure",
            FailureKind::PublishRejected => "PublishRejected",
            FailureKind::Timeout => "Timeout",
            FailureKind::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyExists,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyExists => f.write_str("AlreadyExists"),
        }
    }
}

/// Final outcome of one target's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TargetOutcome {
    Published {
        checksum: String,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        kind: FailureKind,
        reason: String,
        /// Staged artifact left behind for inspection, if the build got
        /// that far.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact: Option<PathBuf>,
    },
}

impl TargetOutcome {
    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        TargetOutcome::Failed {
            kind,
            reason: reason.into(),
            artifact: None,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.is_failed()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TargetOutcome::Failed { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            TargetOutcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for TargetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetOutcome::Published { .. } => f.write_str("Published"),
            TargetOutcome::Skipped { reason } => write!(f, "Skipped({})", reason),
            TargetOutcome::Failed { kind, .. } => write!(f, "Failed({})", kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Succeeded,
    PartiallyFailed,
}

/// Aggregated outcome of a release, one entry per dispatched target.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReleaseResult {
    pub release_id: ReleaseId,
    pub version: ReleaseVersion,
    pub outcomes: BTreeMap<Arch, TargetOutcome>,
    pub started_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    expected: BTreeSet<Arch>,
}

impl ReleaseResult {
    pub fn new(
        release_id: ReleaseId,
        version: ReleaseVersion,
        expected: impl IntoIterator<Item = Arch>,
    ) -> Self {
        Self {
            release_id,
            version,
            outcomes: BTreeMap::new(),
            started_at: Utc::now(),
            finalized_at: None,
            expected: expected.into_iter().collect(),
        }
    }

    /// Record the outcome for one dispatched target. Each target reports
    /// exactly once.
    pub fn record(&mut self, arch: Arch, outcome: TargetOutcome) -> Result<()> {
        if self.finalized_at.is_some() {
            return Err(Error::Internal(format!(
                "outcome for {} arrived after finalization",
                arch
            )));
        }
        if !self.expected.contains(&arch) {
            return Err(Error::UnknownArch(arch.to_string()));
        }
        if self.outcomes.contains_key(&arch) {
            return Err(Error::DuplicateOutcome(arch.to_string()));
        }
        self.outcomes.insert(arch, outcome);
        Ok(())
    }

    /// Targets that have not reported yet.
    pub fn pending(&self) -> Vec<Arch> {
        self.expected
            .iter()
            .filter(|arch| !self.outcomes.contains_key(*arch))
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.pending().is_empty()
    }

    pub fn finalize(&mut self) -> Result<()> {
        let pending = self.pending();
        if !pending.is_empty() {
            return Err(Error::ReleaseIncomplete(
                pending.iter().map(|a| a.to_string()).collect(),
            ));
        }
        self.finalized_at = Some(Utc::now());
        Ok(())
    }

    pub fn outcome(&self, arch: &Arch) -> Option<&TargetOutcome> {
        self.outcomes.get(arch)
    }

    pub fn status(&self) -> ReleaseStatus {
        if self.outcomes.values().all(TargetOutcome::is_success) {
            ReleaseStatus::Succeeded
        } else {
            ReleaseStatus::PartiallyFailed
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == ReleaseStatus::Succeeded
    }

    /// Architectures worth re-running.
    pub fn failed_targets(&self) -> Vec<Arch> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(arch, _)| arch.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{EnvironmentKind, EnvironmentSpec};
    use pretty_assertions::assert_eq;

    fn version() -> ReleaseVersion {
        ReleaseVersion::parse("2.3.0").unwrap()
    }

    fn target() -> BuildTarget {
        BuildTarget {
            arch: Arch::new("x86_64"),
            environment: EnvironmentSpec {
                kind: EnvironmentKind::Host,
                image: None,
                toolchain_version: "1.4.0".to_string(),
                platform: None,
            },
            build_args: vec![],
            artifact: "pkg.whl".to_string(),
            identity: None,
        }
    }

    #[test]
    fn test_release_state_order() {
        let mut state = ReleaseState::Triggered;
        assert!(state.advance(ReleaseState::Aggregating).is_err());
        state.advance(ReleaseState::Dispatched).unwrap();
        state.advance(ReleaseState::Aggregating).unwrap();
        state.advance(ReleaseState::Finalized).unwrap();
        assert!(state.advance(ReleaseState::Triggered).is_err());
    }

    #[test]
    fn test_build_task_lifecycle() {
        let mut task = BuildTask::new(target(), version());
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.succeed().is_err());

        task.start("env-1").unwrap();
        assert_eq!(task.environment_id.as_deref(), Some("env-1"));
        task.succeed().unwrap();
        assert!(task.status().is_terminal());
        assert!(task.fail().is_err());
    }

    #[test]
    fn test_acquisition_failure_skips_running() {
        let mut task = BuildTask::new(target(), version());
        task.fail().unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
    }

    #[test]
    fn test_result_records_each_target_once() {
        let mut result = ReleaseResult::new(
            ReleaseId::new(),
            version(),
            [Arch::new("x86_64"), Arch::new("aarch64")],
        );

        result
            .record(Arch::new("x86_64"), TargetOutcome::Published { checksum: "ab".into() })
            .unwrap();
        assert!(matches!(
            result.record(Arch::new("x86_64"), TargetOutcome::Skipped { reason: SkipReason::AlreadyExists }),
            Err(Error::DuplicateOutcome(_))
        ));
        assert!(matches!(
            result.record(Arch::new("riscv64"), TargetOutcome::Published { checksum: "cd".into() }),
            Err(Error::UnknownArch(_))
        ));

        assert_eq!(result.pending(), vec![Arch::new("aarch64")]);
        assert!(result.finalize().is_err());

        result
            .record(
                Arch::new("aarch64"),
                TargetOutcome::failed(FailureKind::Toolchain, "exit 1"),
            )
            .unwrap();
        result.finalize().unwrap();

        assert_eq!(result.status(), ReleaseStatus::PartiallyFailed);
        assert_eq!(result.failed_targets(), vec![Arch::new("aarch64")]);
    }

    #[test]
    fn test_skipped_counts_as_success() {
        let mut result = ReleaseResult::new(ReleaseId::new(), version(), [Arch::new("x86_64")]);
        result
            .record(
                Arch::new("x86_64"),
                TargetOutcome::Skipped { reason: SkipReason::AlreadyExists },
            )
            .unwrap();
        result.finalize().unwrap();
        assert!(result.is_success());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            TargetOutcome::failed(FailureKind::Toolchain, "boom").to_string(),
            "Failed(ToolchainFailure)"
        );
        assert_eq!(
            TargetOutcome::Skipped { reason: SkipReason::AlreadyExists }.to_string(),
            "Skipped(AlreadyExists)"
        );
    }
}
