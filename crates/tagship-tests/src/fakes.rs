//! In-process stand-ins for the package index and environment providers.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tagship_core::credential::Credential;
use tagship_core::ports::{EnvironmentProvider, ExecutionEnvironment, PackageIndex};
use tagship_core::release::Artifact;
use tagship_core::{Arch, EnvironmentKind, EnvironmentSpec, Error, IndexError, ReleaseVersion, Result};

type Coordinates = (String, String, Arch);

#[derive(Default)]
struct IndexState {
    published: HashMap<Coordinates, String>,
    failures: HashMap<Arch, VecDeque<IndexError>>,
    stalled: HashSet<Arch>,
    upload_calls: HashMap<Arch, u32>,
    tokens: Vec<String>,
}

/// Package index held in memory.
///
/// Uploads succeed unless failures were scripted for the architecture
/// with [`InMemoryIndex::fail_uploads`]; scripted failures are returned
/// in order before uploads start succeeding. Uploads for an architecture
/// marked with [`InMemoryIndex::stall_uploads`] never answer. Publishing the same
/// coordinates twice is rejected with [`IndexError::AlreadyExists`].
pub struct InMemoryIndex {
    name: String,
    state: Mutex<IndexState>,
}

impl InMemoryIndex {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(IndexState::default()),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return these errors from the next uploads for `arch`.
    pub fn fail_uploads(&self, arch: &str, errors: impl IntoIterator<Item = IndexError>) {
        self.state()
            .failures
            .entry(Arch::new(arch))
            .or_default()
            .extend(errors);
    }

    /// Make every upload for `arch` hang, like an index that accepts the
    /// connection and never responds.
    pub fn stall_uploads(&self, arch: &str) {
        self.state().stalled.insert(Arch::new(arch));
    }

    /// Mark an artifact as already present, as if a previous run had
    /// published it.
    pub fn preload(&self, package: &str, version: &str, arch: &str) {
        self.state().published.insert(
            (package.to_string(), version.to_string(), Arch::new(arch)),
            "preloaded".to_string(),
        );
    }

    pub fn is_published(&self, package: &str, version: &str, arch: &str) -> bool {
        self.state()
            .published
            .contains_key(&(package.to_string(), version.to_string(), Arch::new(arch)))
    }

    pub fn published_count(&self) -> usize {
        self.state().published.len()
    }

    pub fn uploads_for(&self, arch: &str) -> u32 {
        self.state()
            .upload_calls
            .get(&Arch::new(arch))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_uploads(&self) -> u32 {
        self.state().upload_calls.values().sum()
    }

    /// Distinct tokens presented with uploads.
    pub fn tokens_seen(&self) -> HashSet<String> {
        self.state().tokens.iter().cloned().collect()
    }
}

#[async_trait]
impl PackageIndex for InMemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(
        &self,
        package: &str,
        version: &ReleaseVersion,
        arch: &Arch,
    ) -> std::result::Result<bool, IndexError> {
        Ok(self.is_published(package, &version.canonical(), arch.as_str()))
    }

    async fn upload(
        &self,
        artifact: &Artifact,
        credential: &Credential,
    ) -> std::result::Result<(), IndexError> {
        let stalled = {
            let mut state = self.state();
            *state.upload_calls.entry(artifact.arch.clone()).or_default() += 1;
            state.tokens.push(credential.token().expose().to_string());
            state.stalled.contains(&artifact.arch)
        };
        if stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let mut state = self.state();
        if let Some(error) = state
            .failures
            .get_mut(&artifact.arch)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let key = (
            artifact.package.clone(),
            artifact.version.canonical(),
            artifact.arch.clone(),
        );
        if state.published.contains_key(&key) {
            return Err(IndexError::AlreadyExists);
        }
        state.published.insert(key, artifact.checksum.clone());
        Ok(())
    }
}

/// Provider for container environments that can never start one, like a
/// host whose Docker daemon is down.
pub struct UnavailableProvider {
    reason: String,
}

impl UnavailableProvider {
    pub fn new(reason: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reason: reason.into(),
        })
    }
}

#[async_trait]
impl EnvironmentProvider for UnavailableProvider {
    fn supports(&self, kind: EnvironmentKind) -> bool {
        kind == EnvironmentKind::Container
    }

    async fn acquire(&self, _spec: &EnvironmentSpec) -> Result<Box<dyn ExecutionEnvironment>> {
        Err(Error::Environment(self.reason.clone()))
    }

    async fn release(&self, _environment: Box<dyn ExecutionEnvironment>) -> Result<()> {
        Ok(())
    }
}
