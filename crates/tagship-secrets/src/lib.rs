//! Secret stores and the credential broker for Tagship.

pub mod broker;
pub mod providers;

pub use broker::CredentialBroker;
pub use providers::{EnvSecretStore, FileSecretStore, from_config};
