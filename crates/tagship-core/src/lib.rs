//! Tagship Core
//!
//! Domain types, ports, and error handling for Tagship.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the runner, secrets, publish and scheduler crates.

pub mod config;
pub mod credential;
pub mod error;
pub mod ids;
pub mod interpolation;
pub mod ports;
pub mod registry;
pub mod release;
pub mod target;
pub mod version;

pub use error::{Error, IndexError, Result};
pub use ids::*;
pub use registry::TargetRegistry;
pub use target::{Arch, BuildTarget, EnvironmentKind, EnvironmentSpec};
pub use version::ReleaseVersion;
