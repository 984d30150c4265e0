// ABOUTME: Transport-agnostic connection lifecycle orchestration for voice identities
// ABOUTME: Config resolution, token dedup, join supervision, reconnect backoff, chat scheduling

pub mod config;
pub mod dedup;
pub mod error;
pub mod expr;
pub mod reconnect;
pub mod scheduler;
pub mod supervisor;
pub mod traits;

pub use config::{resolve_accounts, Account, OrchestratorSettings};
pub use dedup::{CredentialGroup, CredentialGroups};
pub use error::{ChatSendFailure, ConfigParseError, JoinFailure};
pub use reconnect::{BackoffConfig, BackoffState, Phase, ReconnectMachine};
pub use scheduler::PeriodicActions;

// Re-export capability traits for transport implementations
pub use traits::{
    ChatChannel, ChatTransport, JoinRequest, SessionEvent, SessionStatus, VoiceSession,
    VoiceTransport,
};
