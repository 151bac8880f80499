//! HTTP package index client.
//!
//! Protocol:
//! - `GET  {url}/{package}/{version}/{arch}` answers 200 when a
//!   distribution for the triple exists and 404 when it does not.
//! - `PUT  {url}/{package}/{version}/{arch}/{file}` uploads the file
//!   body with HTTP basic auth (`username`, token) and an
//!   `X-Checksum-Sha256` header.
//!
//! Status mapping: 401/403 is an auth failure, 409 means the triple is
//! already published, 408/429/5xx and connection errors are transient,
//! anything else is a rejection.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tagship_core::config::IndexConfig;
use tagship_core::credential::Credential;
use tagship_core::ports::PackageIndex;
use tagship_core::release::Artifact;
use tagship_core::{Arch, Error, IndexError, ReleaseVersion, Result};
use tracing::debug;
use url::Url;

/// Longest response body quoted in an error.
const BODY_EXCERPT: usize = 512;

pub struct HttpPackageIndex {
    name: String,
    base_url: Url,
    username: String,
    client: reqwest::Client,
}

impl HttpPackageIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| Error::InvalidConfig(format!("index.url '{}': {}", config.url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "index.url '{}' cannot be a base URL",
                config.url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("tagship/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: config.name.clone(),
            base_url,
            username: config.username.clone(),
            client,
        })
    }

    fn url_for(&self, segments: &[&str]) -> std::result::Result<Url, IndexError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::Rejected("index URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn classify_status(status: StatusCode, body: &str) -> IndexError {
    let excerpt: String = body.chars().take(BODY_EXCERPT).collect();
    let message = format!("{}: {}", status, excerpt.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => IndexError::Auth(message),
        StatusCode::CONFLICT => IndexError::AlreadyExists,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => IndexError::Transient(message),
        s if s.is_server_error() => IndexError::Transient(message),
        _ => IndexError::Rejected(message),
    }
}

fn classify_transport(error: reqwest::Error) -> IndexError {
    if error.is_builder() {
        IndexError::Rejected(error.to_string())
    } else {
        IndexError::Transient(error.to_string())
    }
}

#[async_trait]
impl PackageIndex for HttpPackageIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(
        &self,
        package: &str,
        version: &ReleaseVersion,
        arch: &Arch,
    ) -> std::result::Result<bool, IndexError> {
        let version = version.canonical();
        let url = self.url_for(&[package, version.as_str(), arch.as_str()])?;
        debug!(url = %url, "Checking index for existing artifact");

        let response = self.client.get(url).send().await.map_err(classify_transport)?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(classify_status(status, &body))
            }
        }
    }

    async fn upload(
        &self,
        artifact: &Artifact,
        credential: &Credential,
    ) -> std::result::Result<(), IndexError> {
        let version = artifact.version.canonical();
        let url = self.url_for(&[
            artifact.package.as_str(),
            version.as_str(),
            artifact.arch.as_str(),
            artifact.file_name.as_str(),
        ])?;

        let body = tokio::fs::read(&artifact.location).await.map_err(|e| {
            IndexError::Rejected(format!(
                "staged artifact {} unreadable: {}",
                artifact.location.display(),
                e
            ))
        })?;

        debug!(url = %url, size_bytes = body.len(), "Uploading to index");

        let response = self
            .client
            .put(url)
            .basic_auth(&self.username, Some(credential.token().expose()))
            .header("X-Checksum-Sha256", &artifact.checksum)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &credential.token().mask(&body)))
    }
}
