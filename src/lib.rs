// ABOUTME: Root library module for the voicekeeper process shell
// ABOUTME: Env-file loading, logging setup, paths, and the optional Discord transport

pub mod env_file;
pub mod logging;
pub mod paths;

#[cfg(feature = "discord")]
pub mod discord;

// Re-export the transport-agnostic core
pub use voicekeeper_core::{config, dedup, error, reconnect, scheduler, supervisor, traits};
pub use voicekeeper_core::{Account, CredentialGroups, OrchestratorSettings, ReconnectMachine};
