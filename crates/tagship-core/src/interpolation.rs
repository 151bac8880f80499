use crate::target::BuildTarget;
use crate::version::ReleaseVersion;
use crate::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("placeholder regex"));

/// Values substituted into toolchain arguments and artifact names.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    variables: BTreeMap<String, String>,
}

impl InterpolationContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for one target build of a release.
    pub fn for_target(package: &str, version: &ReleaseVersion, target: &BuildTarget) -> Self {
        Self::new()
            .with("package", package)
            .with("version", version.canonical())
            .with("arch", target.arch.as_str())
            .with("toolchain_version", &target.environment.toolchain_version)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Replace every `${{ name }}` in `input`.
    ///
    /// Unknown names are an error, never an empty substitution.
    pub fn interpolate(&self, input: &str) -> Result<String> {
        let mut missing = None;
        let output = PLACEHOLDER.replace_all(input, |caps: &regex::Captures| {
            let name = caps.get(1).map_or("", |m| m.as_str());
            match self.variables.get(name) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(Error::UnknownPlaceholder(name)),
            None => Ok(output.into_owned()),
        }
    }

    pub fn interpolate_all(&self, inputs: &[String]) -> Result<Vec<String>> {
        inputs.iter().map(|s| self.interpolate(s)).collect()
    }

    /// Variables as environment entries, e.g. `TAGSHIP_VERSION`.
    pub fn as_env(&self) -> BTreeMap<String, String> {
        self.variables
            .iter()
            .map(|(k, v)| (format!("TAGSHIP_{}", k.to_uppercase()), v.clone()))
            .collect()
    }
}
