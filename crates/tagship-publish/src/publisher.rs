//! Publishing a staged artifact to the package index.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tagship_core::IndexError;
use tagship_core::config::RetryPolicy;
use tagship_core::credential::Credential;
use tagship_core::ports::PackageIndex;
use tagship_core::release::{Artifact, FailureKind, SkipReason, TargetOutcome};
use tracing::{debug, info, warn};

/// Publishes one artifact under one credential.
#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    /// Always resolves to an outcome; index failures become
    /// `TargetOutcome::Failed`.
    async fn publish(&self, artifact: &Artifact, credential: &Credential) -> TargetOutcome;
}

/// Idempotent publisher.
///
/// Checks the index before uploading, and treats an upload that races
/// with another publisher of the same triple as a skip. Only transient
/// index errors are retried, with capped exponential backoff; an
/// authentication failure stops after the attempt that produced it.
pub struct Publisher {
    index: Arc<dyn PackageIndex>,
    retry: RetryPolicy,
}

impl Publisher {
    pub fn new(index: Arc<dyn PackageIndex>, retry: RetryPolicy) -> Self {
        Self { index, retry }
    }

    async fn retrying<T, F, Fut>(
        &self,
        artifact: &Artifact,
        operation: &str,
        mut call: F,
    ) -> Result<T, IndexError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, IndexError>> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        arch = %artifact.arch,
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Index call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(arch = %artifact.arch, operation, attempt, error = %e, "Giving up on index call");
                    return Err(e);
                }
            }
        }
    }

    async fn discard_staged(&self, artifact: &Artifact) {
        if let Err(e) = tokio::fs::remove_file(&artifact.location).await {
            warn!(
                arch = %artifact.arch,
                location = %artifact.location.display(),
                error = %e,
                "Failed to remove staged artifact"
            );
        }
    }

    fn failed(&self, artifact: &Artifact, credential: &Credential, error: &IndexError) -> TargetOutcome {
        let kind = match error {
            IndexError::Transient(_) => FailureKind::PublishTransient,
            IndexError::Auth(_) => FailureKind::PublishAuth,
            IndexError::Rejected(_) | IndexError::AlreadyExists => FailureKind::PublishRejected,
        };
        let reason = credential.token().mask(&error.to_string());
        warn!(arch = %artifact.arch, kind = %kind, reason = %reason, "Publish failed");
        TargetOutcome::Failed {
            kind,
            reason,
            artifact: Some(artifact.location.clone()),
        }
    }
}

#[async_trait]
impl ArtifactPublisher for Publisher {
    async fn publish(&self, artifact: &Artifact, credential: &Credential) -> TargetOutcome {
        let index = self.index.as_ref();

        if !credential.scope.covers(artifact, index.name()) {
            return TargetOutcome::Failed {
                kind: FailureKind::Internal,
                reason: format!(
                    "credential {} is not scoped to {} {} {} on {}",
                    credential.identity,
                    artifact.package,
                    artifact.version,
                    artifact.arch,
                    index.name()
                ),
                artifact: Some(artifact.location.clone()),
            };
        }

        let exists = self
            .retrying(artifact, "exists", move || {
                index.exists(&artifact.package, &artifact.version, &artifact.arch)
            })
            .await;

        match exists {
            Ok(true) => {
                info!(
                    arch = %artifact.arch,
                    version = %artifact.version,
                    index = %index.name(),
                    "Artifact already published, skipping upload"
                );
                self.discard_staged(artifact).await;
                return TargetOutcome::Skipped {
                    reason: SkipReason::AlreadyExists,
                };
            }
            Ok(false) => {}
            Err(e) => return self.failed(artifact, credential, &e),
        }

        info!(
            arch = %artifact.arch,
            version = %artifact.version,
            file = %artifact.file_name,
            size_bytes = artifact.size_bytes,
            identity = %credential.identity,
            "Uploading artifact"
        );

        let uploaded = self
            .retrying(artifact, "upload", move || async move {
                if credential.is_expired() {
                    return Err(IndexError::Auth(format!(
                        "credential {} expired at {}",
                        credential.identity, credential.expires_at
                    )));
                }
                index.upload(artifact, credential).await
            })
            .await;

        match uploaded {
            Ok(()) => {
                info!(
                    arch = %artifact.arch,
                    version = %artifact.version,
                    checksum = %artifact.checksum,
                    "Artifact published"
                );
                self.discard_staged(artifact).await;
                TargetOutcome::Published {
                    checksum: artifact.checksum.clone(),
                }
            }
            Err(IndexError::AlreadyExists) => {
                info!(
                    arch = %artifact.arch,
                    version = %artifact.version,
                    "Artifact appeared on the index during upload, skipping"
                );
                self.discard_staged(artifact).await;
                TargetOutcome::Skipped {
                    reason: SkipReason::AlreadyExists,
                }
            }
            Err(e) => self.failed(artifact, credential, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tagship_core::credential::{CredentialScope, SecretToken};
    use tagship_core::{Arch, ReleaseVersion};

    /// Index whose upload results are scripted in order.
    struct ScriptedIndex {
        exists: bool,
        uploads: Mutex<VecDeque<Result<(), IndexError>>>,
        upload_calls: AtomicU32,
    }

    impl ScriptedIndex {
        fn new(exists: bool, uploads: Vec<Result<(), IndexError>>) -> Arc<Self> {
            Arc::new(Self {
                exists,
                uploads: Mutex::new(uploads.into()),
                upload_calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.upload_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PackageIndex for ScriptedIndex {
        fn name(&self) -> &str {
            "pypi"
        }

        async fn exists(&self, _: &str, _: &ReleaseVersion, _: &Arch) -> Result<bool, IndexError> {
            Ok(self.exists)
        }

        async fn upload(&self, _: &Artifact, _: &Credential) -> Result<(), IndexError> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            self.uploads.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        }
    }

    fn artifact(dir: &Path) -> Artifact {
        let location = dir.join("pkg-2.3.0-x86_64.whl");
        std::fs::write(&location, b"wheel").unwrap();
        Artifact {
            package: "pkg".to_string(),
            arch: Arch::new("x86_64"),
            version: ReleaseVersion::parse("2.3.0").unwrap(),
            file_name: "pkg-2.3.0-x86_64.whl".to_string(),
            location,
            checksum: "c0ffee".to_string(),
            size_bytes: 5,
        }
    }

    fn credential(ttl: chrono::Duration) -> Credential {
        Credential::new(
            CredentialScope {
                package: "pkg".to_string(),
                version: "2.3.0".to_string(),
                arch: Arch::new("x86_64"),
                index: "pypi".to_string(),
            },
            "PYPI_TOKEN",
            SecretToken::new("pypi-secret-token"),
            ttl,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_then_staged_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let index = ScriptedIndex::new(false, vec![Ok(())]);
        let publisher = Publisher::new(index.clone(), policy());
        let artifact = artifact(dir.path());

        let outcome = publisher
            .publish(&artifact, &credential(chrono::Duration::minutes(5)))
            .await;

        assert_eq!(outcome, TargetOutcome::Published { checksum: "c0ffee".to_string() });
        assert_eq!(index.calls(), 1);
        assert!(!artifact.location.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_artifact_is_skipped_without_upload() {
        let dir = tempfile::tempdir().unwrap();
        let index = ScriptedIndex::new(true, vec![]);
        let publisher = Publisher::new(index.clone(), policy());

        let outcome = publisher
            .publish(&artifact(dir.path()), &credential(chrono::Duration::minutes(5)))
            .await;

        assert_eq!(outcome, TargetOutcome::Skipped { reason: SkipReason::AlreadyExists });
        assert_eq!(index.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let index = ScriptedIndex::new(
            false,
            vec![
                Err(IndexError::Transient("502".into())),
                Err(IndexError::Transient("503".into())),
                Ok(()),
            ],
        );
        let publisher = Publisher::new(index.clone(), policy());

        let outcome = publisher
            .publish(&artifact(dir.path()), &credential(chrono::Duration::minutes(5)))
            .await;

        assert!(matches!(outcome, TargetOutcome::Published { .. }));
        assert_eq!(index.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_exhaust_budget() {
        let dir = tempfile::tempdir().unwrap();
        let index = ScriptedIndex::new(
            false,
            (0..10).map(|_| Err(IndexError::Transient("503".into()))).collect(),
        );
        let publisher = Publisher::new(index.clone(), policy());
        let artifact = artifact(dir.path());

        let outcome = publisher
            .publish(&artifact, &credential(chrono::Duration::minutes(5)))
            .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::PublishTransient));
        assert_eq!(index.calls(), 4);
        assert!(artifact.location.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_not_retried_and_masked() {
        let dir = tempfile::tempdir().unwrap();
        let index = ScriptedIndex::new(
            false,
            vec![Err(IndexError::Auth("invalid token pypi-secret-token".into()))],
        );
        let publisher = Publisher::new(index.clone(), policy());

        let outcome = publisher
            .publish(&artifact(dir.path()), &credential(chrono::Duration::minutes(5)))
            .await;

        assert_eq!(index.calls(), 1);
        match outcome {
            TargetOutcome::Failed { kind, reason, artifact } => {
                assert_eq!(kind, FailureKind::PublishAuth);
                assert!(!reason.contains("pypi-secret-token"), "{reason}");
                assert!(artifact.is_some());
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_on_upload_is_skip() {
        let dir = tempfile::tempdir().unwrap();
        let index = ScriptedIndex::new(false, vec![Err(IndexError::AlreadyExists)]);
        let publisher = Publisher::new(index.clone(), policy());

        let outcome = publisher
            .publish(&artifact(dir.path()), &credential(chrono::Duration::minutes(5)))
            .await;

        assert_eq!(outcome, TargetOutcome::Skipped { reason: SkipReason::AlreadyExists });
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_upload() {
        let dir = tempfile::tempdir().unwrap();
        let index = ScriptedIndex::new(false, vec![Err(IndexError::Rejected("bad wheel tag".into()))]);
        let publisher = Publisher::new(index.clone(), policy());

        let outcome = publisher
            .publish(&artifact(dir.path()), &credential(chrono::Duration::minutes(5)))
            .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::PublishRejected));
        assert_eq!(index.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_credential_never_reaches_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = ScriptedIndex::new(false, vec![]);
        let publisher = Publisher::new(index.clone(), policy());

        let outcome = publisher
            .publish(&artifact(dir.path()), &credential(chrono::Duration::zero()))
            .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::PublishAuth));
        assert_eq!(index.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_for_other_arch_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let index = ScriptedIndex::new(false, vec![]);
        let publisher = Publisher::new(index.clone(), policy());
        let mut artifact = artifact(dir.path());
        artifact.arch = Arch::new("aarch64");

        let outcome = publisher
            .publish(&artifact, &credential(chrono::Duration::minutes(5)))
            .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Internal));
        assert_eq!(index.calls(), 0);
    }
}
