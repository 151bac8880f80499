//! Isolated build task execution for Tagship.

pub mod container;
pub mod host;
pub mod runner;

pub use container::{ContainerEnvironment, ContainerEnvironmentProvider};
pub use host::{HostEnvironment, HostEnvironmentProvider};
pub use runner::{
    BuildFailure, BuildFailureKind, BuildRunner, BuildTaskRunner, RunnerConfig, checksum, stage,
};
