// ABOUTME: Capability traits for the voice and chat transports the orchestrator drives
// ABOUTME: Sessions publish state changes and errors on a broadcast channel the core subscribes to

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

// =============================================================================
// Voice Session
// =============================================================================

/// Lifecycle status of a voice session, as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Voice state update sent, waiting for the gateway to answer
    Signalling,
    /// Gateway answered, media connection being established
    Connecting,
    /// Session is usable
    Ready,
    /// Session lost its connection
    Disconnected,
    /// Session was torn down and will not come back
    Destroyed,
}

impl SessionStatus {
    /// Statuses worth logging transitions for.
    pub fn is_important(self) -> bool {
        matches!(self, Self::Ready | Self::Disconnected | Self::Destroyed)
    }

    /// Statuses that mean the session is gone and a reconnect is needed.
    pub fn is_lost(self) -> bool {
        matches!(self, Self::Disconnected | Self::Destroyed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signalling => "signalling",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted by a voice session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChange {
        from: SessionStatus,
        to: SessionStatus,
    },
    Error(String),
}

/// A live (or in-progress) connection to one voice channel.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    /// Current status
    fn status(&self) -> SessionStatus;

    /// Subscribe to state-change and error events emitted after this call
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Tear the session down. Callers treat errors as non-fatal.
    async fn destroy(&self) -> Result<()>;
}

/// Parameters for a single join request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Guild (or equivalent) the voice channel belongs to
    pub group_id: String,
    /// Voice channel to join
    pub channel_id: String,
    /// Label used to scope the session and tag log lines
    pub group_label: String,
    pub self_deafen: bool,
    pub self_mute: bool,
}

/// Creates voice sessions. One transport serves exactly one credential.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Resolve the target channel and request a session for it.
    ///
    /// Returns as soon as the join has been requested; readiness is observed
    /// through [`VoiceSession::status`] and [`VoiceSession::subscribe`].
    async fn join(&self, request: &JoinRequest) -> Result<Arc<dyn VoiceSession>>;
}

// =============================================================================
// Chat
// =============================================================================

/// A resolved channel that may accept text messages
#[async_trait]
pub trait ChatChannel: Send + Sync {
    fn id(&self) -> &str;

    /// Whether the channel can hold text at all
    fn supports_text(&self) -> bool;

    async fn send(&self, text: &str) -> Result<()>;
}

/// Resolves channels by ID for sending chat commands
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn resolve_channel(&self, channel_id: &str) -> Result<Box<dyn ChatChannel>>;
}
