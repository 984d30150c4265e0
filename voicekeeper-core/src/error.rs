// ABOUTME: Error taxonomy for per-account failures, all of them recoverable
// ABOUTME: Join failures feed the reconnect backoff; chat failures end a single cycle

use thiserror::Error;

/// Why a join attempt did not produce a ready session.
///
/// The `Display` form is the reason string carried into reconnect logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinFailure {
    #[error("exception")]
    Exception,

    #[error("ready-timeout")]
    ReadyTimeout,

    #[error("error: {0}")]
    Session(String),
}

/// A chat command could not be delivered.
#[derive(Debug, Error)]
pub enum ChatSendFailure {
    #[error("channel {0} does not support text")]
    NotText(String),

    #[error("failed to resolve channel {channel_id}: {source}")]
    Resolve {
        channel_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to send to channel {channel_id}: {source}")]
    Send {
        channel_id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// The configuration source could not be read or parsed.
#[derive(Debug, Error)]
#[error("cannot read config {path}: {message}")]
pub struct ConfigParseError {
    pub path: String,
    pub message: String,
}
