//! Credential broker: turns a secret-store identity into a credential
//! scoped to one (package, version, architecture, index) upload.

use chrono::Duration;
use std::sync::Arc;
use tagship_core::config::ReleaseConfig;
use tagship_core::credential::{Credential, CredentialScope, SecretToken};
use tagship_core::ports::SecretStore;
use tagship_core::{BuildTarget, Error, ReleaseVersion, Result};
use tracing::{debug, warn};

/// Resolves publish credentials at invocation time.
///
/// Nothing is cached: every call reads the store, and the returned
/// credential lives only as long as the caller holds it.
pub struct CredentialBroker {
    store: Arc<dyn SecretStore>,
    package: String,
    index: String,
    default_identity: String,
    ttl: Duration,
}

impl CredentialBroker {
    pub fn new(
        store: Arc<dyn SecretStore>,
        package: impl Into<String>,
        index: impl Into<String>,
        default_identity: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            package: package.into(),
            index: index.into(),
            default_identity: default_identity.into(),
            ttl,
        }
    }

    pub fn from_config(store: Arc<dyn SecretStore>, config: &ReleaseConfig) -> Self {
        Self::new(
            store,
            &config.package,
            &config.index.name,
            &config.index.identity,
            config.policy.credential_ttl(),
        )
    }

    /// Resolve the credential for one target's upload of `version`.
    ///
    /// A missing, empty or non-UTF-8 secret is
    /// [`Error::CredentialUnavailable`]; a store failure is
    /// [`Error::SecretStore`].
    pub async fn resolve(&self, target: &BuildTarget, version: &ReleaseVersion) -> Result<Credential> {
        let identity = target
            .identity
            .as_deref()
            .unwrap_or(&self.default_identity);

        let raw = self
            .store
            .get_secret(identity)
            .await?
            .ok_or_else(|| Error::CredentialUnavailable {
                identity: identity.to_string(),
            })?;

        let token = match String::from_utf8(raw) {
            Ok(value) if !value.trim().is_empty() => SecretToken::new(value.trim()),
            _ => {
                warn!(identity = %identity, store = %self.store.name(), "Secret is empty or not UTF-8");
                return Err(Error::CredentialUnavailable {
                    identity: identity.to_string(),
                });
            }
        };

        let scope = CredentialScope {
            package: self.package.clone(),
            version: version.canonical(),
            arch: target.arch.clone(),
            index: self.index.clone(),
        };

        debug!(
            identity = %identity,
            arch = %target.arch,
            version = %version,
            index = %self.index,
            "Resolved publish credential"
        );

        Ok(Credential::new(scope, identity, token, self.ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FileSecretStore;
    use std::collections::HashMap;
    use tagship_core::target::{Arch, EnvironmentKind, EnvironmentSpec};

    fn target(arch: &str, identity: Option<&str>) -> BuildTarget {
        BuildTarget {
            arch: Arch::new(arch),
            environment: EnvironmentSpec {
                kind: EnvironmentKind::Host,
                image: None,
                toolchain_version: "1.0".to_string(),
                platform: None,
            },
            build_args: vec![],
            artifact: "pkg.whl".to_string(),
            identity: identity.map(str::to_string),
        }
    }

    fn broker(secrets: &[(&str, &str)]) -> CredentialBroker {
        let map: HashMap<String, String> = secrets
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CredentialBroker::new(
            Arc::new(FileSecretStore::from_map(map)),
            "pkg",
            "pypi",
            "PYPI_TOKEN",
            Duration::minutes(10),
        )
    }

    fn version() -> ReleaseVersion {
        ReleaseVersion::parse("2.3.0").unwrap()
    }

    #[tokio::test]
    async fn test_resolve_scopes_to_target() {
        let broker = broker(&[("PYPI_TOKEN", "pypi-default\n")]);
        let credential = broker.resolve(&target("aarch64", None), &version()).await.unwrap();

        assert_eq!(credential.identity, "PYPI_TOKEN");
        assert_eq!(credential.token().expose(), "pypi-default");
        assert_eq!(credential.scope.arch, Arch::new("aarch64"));
        assert_eq!(credential.scope.version, "2.3.0");
        assert_eq!(credential.scope.index, "pypi");
        assert!(!credential.is_expired());
    }

    #[tokio::test]
    async fn test_target_identity_override() {
        let broker = broker(&[("PYPI_TOKEN", "default"), ("ARM_TOKEN", "arm-only")]);
        let credential = broker
            .resolve(&target("aarch64", Some("ARM_TOKEN")), &version())
            .await
            .unwrap();
        assert_eq!(credential.identity, "ARM_TOKEN");
        assert_eq!(credential.token().expose(), "arm-only");
    }

    #[tokio::test]
    async fn test_missing_secret_is_unavailable() {
        let broker = broker(&[]);
        let err = broker.resolve(&target("x86_64", None), &version()).await.unwrap_err();
        assert!(matches!(err, Error::CredentialUnavailable { identity } if identity == "PYPI_TOKEN"));
    }

    #[tokio::test]
    async fn test_blank_secret_is_unavailable() {
        let broker = broker(&[("PYPI_TOKEN", "   ")]);
        let err = broker.resolve(&target("x86_64", None), &version()).await.unwrap_err();
        assert!(matches!(err, Error::CredentialUnavailable { .. }));
    }
}
