//! Release triggering and coordination for Tagship.

pub mod coordinator;
pub mod triggers;

pub use coordinator::{PlannedTarget, ReleaseCoordinator, ReleasePlan};
pub use triggers::{TagMatch, TriggerMatcher};
