//! Artifact publishing for Tagship.
//!
//! [`Publisher`] enforces at-most-once publication per
//! (package, version, architecture) against any [`PackageIndex`];
//! [`HttpPackageIndex`] is the HTTP implementation of that port.
//!
//! [`PackageIndex`]: tagship_core::ports::PackageIndex

pub mod http_index;
pub mod publisher;

pub use http_index::HttpPackageIndex;
pub use publisher::{ArtifactPublisher, Publisher};
