//! Error types for Tagship.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Duplicate architecture in target registry: {0}")]
    DuplicateArch(String),

    #[error("Unknown target architecture: {0}")]
    UnknownArch(String),

    #[error("Unknown placeholder: {0}")]
    UnknownPlaceholder(String),

    // Version errors
    #[error("Malformed version '{input}': {reason}")]
    MalformedVersion { input: String, reason: String },

    // Credential errors
    #[error("Credential unavailable for identity {identity}")]
    CredentialUnavailable { identity: String },

    #[error("Secret store error: {0}")]
    SecretStore(String),

    // Environment errors
    #[error("Environment error: {0}")]
    Environment(String),

    // Lifecycle errors
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Duplicate outcome for target: {0}")]
    DuplicateOutcome(String),

    #[error("Release incomplete, pending targets: {0:?}")]
    ReleaseIncomplete(Vec<String>),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Errors reported by a package index.
///
/// The variants drive the publisher's retry decision: only `Transient`
/// is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("Transient index failure: {0}")]
    Transient(String),

    #[error("Index authentication failed: {0}")]
    Auth(String),

    #[error("Artifact already exists on the index")]
    AlreadyExists,

    #[error("Index rejected the upload: {0}")]
    Rejected(String),
}

impl IndexError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IndexError::Transient(_))
    }
}
