//! Release version extracted from a tag.

use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A semantic version carried by a release tag.
///
/// The canonical form (`Display`) is what appears after the tag prefix and
/// what the package index receives as the version identifier. Parsing the
/// canonical form yields an equal value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre_release: Option<String>,
    pub build: Option<String>,
    raw: String,
}

impl ReleaseVersion {
    /// Parse a strict `MAJOR.MINOR.PATCH[-PRE][+BUILD]` string.
    pub fn parse(input: &str) -> Result<Self> {
        let parsed = semver::Version::parse(input).map_err(|e| Error::MalformedVersion {
            input: input.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            major: parsed.major,
            minor: parsed.minor,
            patch: parsed.patch,
            pre_release: (!parsed.pre.is_empty()).then(|| parsed.pre.to_string()),
            build: (!parsed.build.is_empty()).then(|| parsed.build.to_string()),
            raw: input.to_string(),
        })
    }

    /// The string this version was parsed from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre_release.is_some()
    }

    /// Canonical string form, e.g. `2.3.0` or `2.3.0-rc.1+build.5`.
    pub fn canonical(&self) -> String {
        let mut out = format!("{}.{}.{}", self.major, self.minor, self.patch);
        if let Some(pre) = &self.pre_release {
            out.push('-');
            out.push_str(pre);
        }
        if let Some(build) = &self.build {
            out.push('+');
            out.push_str(build);
        }
        out
    }

    /// Full tag name for this version under the given prefix.
    pub fn tag(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.canonical())
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for ReleaseVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ReleaseVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl JsonSchema for ReleaseVersion {
    fn schema_name() -> String {
        "ReleaseVersion".to_string()
    }

    fn json_schema(generator: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
        <String as JsonSchema>::json_schema(generator)
    }
}

impl From<ReleaseVersion> for String {
    fn from(version: ReleaseVersion) -> Self {
        version.canonical()
    }
}
