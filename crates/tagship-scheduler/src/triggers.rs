//! Tag matching: decides whether a pushed reference is a release.

use tagship_core::ReleaseVersion;
use tagship_core::config::TagPattern;
use tagship_core::release::ReleaseEvent;
use tracing::{debug, warn};

const TAG_REF_PREFIX: &str = "refs/tags/";

/// Result of evaluating one reference against the tag pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagMatch {
    Release(ReleaseVersion),
    /// A branch or other non-tag reference.
    NotATag,
    /// A tag without the release prefix.
    PrefixMismatch,
    /// Prefix matched but the suffix is not a semantic version.
    Malformed { suffix: String, reason: String },
    /// A pre-release while the pattern does not allow them.
    PrereleaseNotAllowed(ReleaseVersion),
}

/// Matcher for release tags.
pub struct TriggerMatcher {
    pattern: TagPattern,
}

impl TriggerMatcher {
    pub fn new(pattern: TagPattern) -> Self {
        Self { pattern }
    }

    pub fn pattern(&self) -> &TagPattern {
        &self.pattern
    }

    /// Classify a reference. `refs/tags/` is stripped; any other `refs/`
    /// reference is not a tag.
    pub fn evaluate(&self, reference: &str) -> TagMatch {
        let tag = match reference.strip_prefix(TAG_REF_PREFIX) {
            Some(tag) => tag,
            None if reference.starts_with("refs/") => return TagMatch::NotATag,
            None => reference,
        };

        let Some(suffix) = tag.strip_prefix(&self.pattern.prefix) else {
            return TagMatch::PrefixMismatch;
        };

        match ReleaseVersion::parse(suffix) {
            Ok(version) if version.is_prerelease() && !self.pattern.allow_prerelease => {
                TagMatch::PrereleaseNotAllowed(version)
            }
            Ok(version) => TagMatch::Release(version),
            Err(e) => TagMatch::Malformed {
                suffix: suffix.to_string(),
                reason: e.to_string(),
            },
        }
    }

    /// Classify an event's reference and log the outcome.
    ///
    /// A tag carrying the release prefix with a malformed or disallowed
    /// pre-release version is logged as a warning; nothing else about a
    /// non-matching reference is noteworthy.
    pub fn classify(&self, event: &ReleaseEvent) -> TagMatch {
        let outcome = self.evaluate(&event.reference);
        match &outcome {
            TagMatch::Release(version) => {
                debug!(reference = %event.reference, version = %version, "Reference is a release tag");
            }
            TagMatch::Malformed { suffix, reason } => {
                warn!(
                    reference = %event.reference,
                    suffix = %suffix,
                    reason = %reason,
                    "Tag has the release prefix but no valid version"
                );
            }
            TagMatch::PrereleaseNotAllowed(version) => {
                warn!(
                    reference = %event.reference,
                    version = %version,
                    "Pre-release tag ignored; set tag.allow_prerelease to release it"
                );
            }
            TagMatch::NotATag | TagMatch::PrefixMismatch => {
                debug!(reference = %event.reference, "Reference is not a release tag");
            }
        }
        outcome
    }

    /// The release version an event denotes, if any.
    pub fn matches(&self, event: &ReleaseEvent) -> Option<ReleaseVersion> {
        match self.classify(event) {
            TagMatch::Release(version) => Some(version),
            _ => None,
        }
    }
}
