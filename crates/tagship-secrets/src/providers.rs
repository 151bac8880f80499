//! Secret store implementations.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tagship_core::config::SecretsConfig;
use tagship_core::ports::SecretStore;
use tagship_core::{Error, Result};
use tracing::info;

/// Environment variable secret store.
pub struct EnvSecretStore {
    prefix: Option<String>,
}

impl EnvSecretStore {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    fn resolve_name(&self, identity: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{}_{}", p, identity),
            None => identity.to_string(),
        }
    }
}

impl Default for EnvSecretStore {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, identity: &str) -> Result<Option<Vec<u8>>> {
        let name = self.resolve_name(identity);
        match std::env::var_os(&name) {
            Some(value) => Ok(Some(value.into_encoded_bytes())),
            None => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "env"
    }
}

/// JSON file secret store: a flat object of identity to secret.
pub struct FileSecretStore {
    secrets: HashMap<String, String>,
}

impl FileSecretStore {
    pub fn from_map(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }

    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::SecretStore(format!("failed to read {}: {}", path.display(), e))
        })?;

        let secrets: HashMap<String, String> = serde_json::from_str(&content)
            .map_err(|e| Error::SecretStore(format!("failed to parse {}: {}", path.display(), e)))?;

        Ok(Self { secrets })
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get_secret(&self, identity: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.secrets.get(identity).map(|s| s.as_bytes().to_vec()))
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Build the store named by the deployment config.
pub async fn from_config(config: &SecretsConfig) -> Result<Arc<dyn SecretStore>> {
    let store: Arc<dyn SecretStore> = match config {
        SecretsConfig::Env { prefix } => Arc::new(EnvSecretStore::new(prefix.clone())),
        SecretsConfig::File { path } => Arc::new(FileSecretStore::load_from_file(path).await?),
    };
    info!(provider = %store.name(), "Configured secret store");
    Ok(store)
}
