//! Scoped publish credentials.

use crate::release::Artifact;
use crate::target::Arch;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Secret material that never renders in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw value, for the single place that hands it to the index.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Replace occurrences of the secret in `input` with `***`.
    pub fn mask(&self, input: &str) -> String {
        if self.0.len() < 4 {
            return input.to_string();
        }
        input.replace(&self.0, "***")
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(***)")
    }
}

impl fmt::Display for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// What a credential may be used for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope {
    pub package: String,
    pub version: String,
    pub arch: Arch,
    pub index: String,
}

impl CredentialScope {
    pub fn covers(&self, artifact: &Artifact, index: &str) -> bool {
        self.package == artifact.package
            && self.version == artifact.version.canonical()
            && self.arch == artifact.arch
            && self.index == index
    }
}

/// A time-bounded credential for one upload.
///
/// Not `Serialize`: credentials are never written to durable
/// state.
#[derive(Debug, Clone)]
pub struct Credential {
    pub scope: CredentialScope,
    /// Name of the secret-store entry, safe to log.
    pub identity: String,
    token: SecretToken,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(scope: CredentialScope, identity: impl Into<String>, token: SecretToken, ttl: Duration) -> Self {
        let issued_at = Utc::now();
        Self {
            scope,
            identity: identity.into(),
            token,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    pub fn token(&self) -> &SecretToken {
        &self.token
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> CredentialScope {
        CredentialScope {
            package: "pkg".to_string(),
            version: "2.3.0".to_string(),
            arch: Arch::new("x86_64"),
            index: "pypi".to_string(),
        }
    }

    #[test]
    fn test_debug_never_shows_token() {
        let credential = Credential::new(
            scope(),
            "PYPI_TOKEN",
            SecretToken::new("pypi-AgEIcHlwaS5vcmc"),
            Duration::minutes(5),
        );
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("pypi-AgEIcHlwaS5vcmc"));
        assert!(rendered.contains("PYPI_TOKEN"));
    }

    #[test]
    fn test_expiry() {
        let fresh = Credential::new(scope(), "id", SecretToken::new("secret"), Duration::minutes(5));
        assert!(!fresh.is_expired());

        let stale = Credential::new(scope(), "id", SecretToken::new("secret"), Duration::zero());
        assert!(stale.is_expired());
    }

    #[test]
    fn test_mask() {
        let token = SecretToken::new("hunter2");
        assert_eq!(token.mask("denied for hunter2"), "denied for ***");
    }
}
