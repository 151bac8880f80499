//! Integration test infrastructure for Tagship.
//!
//! Release scenarios run the real coordinator, runner, broker and
//! publisher end to end. Builds execute `sh` scripts in host
//! environments; the package index is either the in-memory
//! [`InMemoryIndex`] or a wiremock server behind the HTTP client.
//!
//! # Usage
//!
//! ```ignore
//! use tagship_tests::{BUILD_ALL, INDEX, InMemoryIndex, ReleaseHarness};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = ReleaseHarness::new(BUILD_ALL);
//!     let index = InMemoryIndex::new(INDEX);
//!     let coordinator = harness.coordinator(index.clone());
//!     let result = coordinator.release(&harness.version("2.3.0"), &[]).await.unwrap();
//! }
//! ```

pub mod fakes;
pub mod fixtures;

pub use fakes::*;
pub use fixtures::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,tagship_scheduler=debug,tagship_publish=debug")),
        )
        .with_test_writer()
        .try_init();
}
