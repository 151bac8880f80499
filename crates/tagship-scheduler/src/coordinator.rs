//! Release coordination: fan out one build-then-publish pipeline per
//! target and aggregate the outcomes.

use crate::triggers::TriggerMatcher;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tagship_core::config::ReleaseConfig;
use tagship_core::interpolation::InterpolationContext;
use tagship_core::release::{FailureKind, ReleaseEvent, ReleaseResult, ReleaseState, TargetOutcome};
use tagship_core::{Arch, BuildTarget, ReleaseId, ReleaseVersion, Result};
use tagship_publish::ArtifactPublisher;
use tagship_runner::{BuildFailure, BuildRunner};
use tagship_secrets::CredentialBroker;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// What a release would do, without doing it.
#[derive(Debug, Clone, Serialize)]
pub struct ReleasePlan {
    pub package: String,
    pub version: ReleaseVersion,
    pub tag: String,
    pub index: String,
    pub targets: Vec<PlannedTarget>,
}

impl ReleasePlan {
    pub fn new(config: &ReleaseConfig, version: &ReleaseVersion, only: &[Arch]) -> Result<Self> {
        let targets = config.targets.select(only)?;
        let mut planned = Vec::with_capacity(targets.len());
        for target in &targets {
            let ctx = InterpolationContext::for_target(&config.package, version, target);
            planned.push(PlannedTarget {
                arch: target.arch.clone(),
                environment: target.environment.describe(),
                artifact: ctx.interpolate(&target.artifact)?,
                identity: config.identity_for(target).to_string(),
            });
        }

        Ok(Self {
            package: config.package.clone(),
            version: version.clone(),
            tag: version.tag(&config.tag.prefix),
            index: config.index.name.clone(),
            targets: planned,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedTarget {
    pub arch: Arch,
    pub environment: String,
    pub artifact: String,
    pub identity: String,
}

/// The shared pieces every target pipeline needs.
#[derive(Clone)]
struct Pipeline {
    runner: Arc<dyn BuildRunner>,
    broker: Arc<CredentialBroker>,
    publisher: Arc<dyn ArtifactPublisher>,
    publish_timeout: Duration,
}

impl Pipeline {
    /// Build, resolve credentials, publish. Every exit path yields an
    /// outcome; the credential is dropped when this returns.
    async fn run(self, target: BuildTarget, version: ReleaseVersion) -> TargetOutcome {
        let arch = &target.arch;

        let artifact = match self.runner.run(&target, &version).await {
            Ok(artifact) => artifact,
            Err(failure) => return build_failed(failure),
        };

        let credential = match self.broker.resolve(&target, &version).await {
            Ok(credential) => credential,
            Err(e) => {
                error!(arch = %arch, error = %e, "Publish credential unavailable");
                return TargetOutcome::Failed {
                    kind: FailureKind::CredentialUnavailable,
                    reason: e.to_string(),
                    artifact: Some(artifact.location),
                };
            }
        };

        match timeout(self.publish_timeout, self.publisher.publish(&artifact, &credential)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(arch = %arch, timeout_secs = self.publish_timeout.as_secs(), "Publish timed out");
                TargetOutcome::Failed {
                    kind: FailureKind::Timeout,
                    reason: format!("publish exceeded {}s", self.publish_timeout.as_secs()),
                    artifact: Some(artifact.location),
                }
            }
        }
    }
}

fn build_failed(failure: BuildFailure) -> TargetOutcome {
    let last_line = failure
        .diagnostics
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty());
    let reason = match last_line {
        Some(line) => format!("{}: {}", failure.message, line),
        None => failure.message,
    };
    TargetOutcome::failed(failure.kind.into(), reason)
}

/// Top-level control loop for releases.
pub struct ReleaseCoordinator {
    config: Arc<ReleaseConfig>,
    matcher: TriggerMatcher,
    pipeline: Pipeline,
}

impl ReleaseCoordinator {
    pub fn new(
        config: Arc<ReleaseConfig>,
        runner: Arc<dyn BuildRunner>,
        broker: Arc<CredentialBroker>,
        publisher: Arc<dyn ArtifactPublisher>,
    ) -> Self {
        let pipeline = Pipeline {
            runner,
            broker,
            publisher,
            publish_timeout: config.policy.publish_timeout(),
        };
        Self {
            matcher: TriggerMatcher::new(config.tag.clone()),
            config,
            pipeline,
        }
    }

    pub fn matcher(&self) -> &TriggerMatcher {
        &self.matcher
    }

    /// Run a release if the event is a release tag. `Ok(None)` means the
    /// event did not match and nothing was started.
    pub async fn handle_event(&self, event: &ReleaseEvent) -> Result<Option<ReleaseResult>> {
        match self.matcher.matches(event) {
            Some(version) => self.release(&version, &[]).await.map(Some),
            None => {
                info!(reference = %event.reference, "No release triggered");
                Ok(None)
            }
        }
    }

    /// Describe the release of `version` restricted to `only` (all targets
    /// when empty).
    pub fn plan(&self, version: &ReleaseVersion, only: &[Arch]) -> Result<ReleasePlan> {
        ReleasePlan::new(&self.config, version, only)
    }

    /// Release `version` to every selected target concurrently and wait
    /// for all of them. One target's failure never cancels another.
    pub async fn release(&self, version: &ReleaseVersion, only: &[Arch]) -> Result<ReleaseResult> {
        let targets = self.config.targets.select(only)?;
        let release_id = ReleaseId::new();
        let mut state = ReleaseState::Triggered;
        let mut result = ReleaseResult::new(
            release_id,
            version.clone(),
            targets.iter().map(|t| t.arch.clone()),
        );

        info!(
            release_id = %release_id,
            version = %version,
            targets = targets.len(),
            "Release triggered"
        );

        let mut pipelines: FuturesUnordered<_> = targets
            .into_iter()
            .map(|target| {
                let arch = target.arch.clone();
                let handle = tokio::spawn(self.pipeline.clone().run(target, version.clone()));
                async move { (arch, handle.await) }
            })
            .collect();

        state.advance(ReleaseState::Dispatched)?;
        info!(release_id = %release_id, "Target pipelines dispatched");

        state.advance(ReleaseState::Aggregating)?;
        while let Some((arch, joined)) = pipelines.next().await {
            let outcome = joined.unwrap_or_else(|e| {
                error!(release_id = %release_id, arch = %arch, error = %e, "Target pipeline aborted");
                TargetOutcome::failed(FailureKind::Internal, format!("pipeline aborted: {}", e))
            });
            info!(release_id = %release_id, arch = %arch, outcome = %outcome, "Target finished");
            result.record(arch, outcome)?;
        }

        result.finalize()?;
        state.advance(ReleaseState::Finalized)?;

        if result.is_success() {
            info!(release_id = %release_id, version = %version, "Release succeeded");
        } else {
            let failed: Vec<String> = result.failed_targets().iter().map(Arch::to_string).collect();
            warn!(
                release_id = %release_id,
                version = %version,
                failed = ?failed,
                "Release partially failed; re-run the failed targets"
            );
        }

        Ok(result)
    }
}
