// ABOUTME: Single voice join attempt with ready-timeout and normalized failure reporting
// ABOUTME: Logs only important state transitions, debounced per "from->to" pair

use crate::config::Account;
use crate::error::JoinFailure;
use crate::traits::{JoinRequest, SessionEvent, SessionStatus, VoiceSession, VoiceTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Identical transitions repeating within this window are logged once
pub const TRANSITION_DEBOUNCE: Duration = Duration::from_millis(1500);

/// Receives every failure observed for a session, during and after the join
pub type FailureCallback = Arc<dyn Fn(JoinFailure) + Send + Sync>;

/// Decides which state transitions are worth a log line
#[derive(Debug, Default)]
pub struct TransitionLog {
    last_pair: Option<(SessionStatus, SessionStatus)>,
    last_at: Option<Instant>,
}

impl TransitionLog {
    /// Returns true when `from -> to` should be logged at `now`, and records it.
    pub fn should_log(&mut self, from: SessionStatus, to: SessionStatus, now: Instant) -> bool {
        if from == to || (!from.is_important() && !to.is_important()) {
            return false;
        }

        let repeated = self.last_pair == Some((from, to))
            && self
                .last_at
                .is_some_and(|at| now.saturating_duration_since(at) < TRANSITION_DEBOUNCE);
        if repeated {
            return false;
        }

        self.last_pair = Some((from, to));
        self.last_at = Some(now);
        true
    }
}

fn log_transition(tag: &str, group: &str, from: SessionStatus, to: SessionStatus) {
    match to {
        SessionStatus::Ready => tracing::info!(account = %tag, group = %group, "Voice READY"),
        SessionStatus::Disconnected => {
            tracing::warn!(account = %tag, group = %group, "Voice DISCONNECTED")
        }
        SessionStatus::Destroyed => {
            tracing::warn!(account = %tag, group = %group, "Voice DESTROYED")
        }
        _ => tracing::info!(account = %tag, group = %group, %from, %to, "Voice state changed"),
    }
}

/// Log transitions and forward session errors until the session is destroyed.
///
/// Subscribes before returning so no event emitted after the call is missed.
pub fn spawn_session_listener(
    session: &Arc<dyn VoiceSession>,
    tag: &str,
    group: &str,
    on_failure: FailureCallback,
) -> JoinHandle<()> {
    let mut events = session.subscribe();
    let tag = tag.to_string();
    let group = group.to_string();

    tokio::spawn(async move {
        let mut transitions = TransitionLog::default();
        loop {
            match events.recv().await {
                Ok(SessionEvent::StateChange { from, to }) => {
                    if transitions.should_log(from, to, Instant::now()) {
                        log_transition(&tag, &group, from, to);
                    }
                    if to == SessionStatus::Destroyed {
                        break;
                    }
                }
                Ok(SessionEvent::Error(message)) => {
                    tracing::error!(account = %tag, group = %group, error = %message, "Voice ERROR");
                    on_failure(JoinFailure::Session(message));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(account = %tag, skipped, "Session listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Wait until `session` reports `target`, for at most `timeout`.
///
/// Returns false on timeout or when the session's event stream closes first.
pub async fn wait_for_status(
    session: &dyn VoiceSession,
    target: SessionStatus,
    timeout: Duration,
) -> bool {
    let mut events = session.subscribe();
    if session.status() == target {
        return true;
    }

    let reached = async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::StateChange { to, .. }) if to == target => return true,
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    if session.status() == target {
                        return true;
                    }
                }
                Err(RecvError::Closed) => return false,
            }
        }
    };

    tokio::time::timeout(timeout, reached).await.unwrap_or(false)
}

/// Destroy a session, logging instead of propagating failures.
pub async fn destroy_quietly(session: &dyn VoiceSession, tag: &str) {
    if let Err(e) = session.destroy().await {
        tracing::debug!(account = %tag, error = %e, "Ignoring session destroy error");
    }
}

/// Perform one join attempt for `account`.
///
/// Every failure is reported through `on_failure` and yields `None`; nothing
/// propagates to the caller. With `ready_timeout == None` the session is
/// returned without waiting for it to become ready.
pub async fn attempt_join(
    transport: &dyn VoiceTransport,
    account: &Account,
    tag: &str,
    group_label: &str,
    ready_timeout: Option<Duration>,
    on_failure: FailureCallback,
) -> Option<Arc<dyn VoiceSession>> {
    let request = JoinRequest {
        group_id: account.target_group_id.clone(),
        channel_id: account.target_channel_id.clone(),
        group_label: group_label.to_string(),
        self_deafen: account.self_deafen,
        self_mute: account.self_mute,
    };

    let session = match transport.join(&request).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(
                account = %tag,
                group = %group_label,
                channel = %request.channel_id,
                error = %format!("{e:#}"),
                "Failed to join voice"
            );
            on_failure(JoinFailure::Exception);
            return None;
        }
    };

    tracing::info!(account = %tag, group = %group_label, "Join voice requested");
    spawn_session_listener(&session, tag, group_label, on_failure.clone());

    if let Some(timeout) = ready_timeout {
        if !wait_for_status(&*session, SessionStatus::Ready, timeout).await {
            tracing::warn!(
                account = %tag,
                group = %group_label,
                timeout_ms = timeout.as_millis() as u64,
                "Voice READY timeout, will retry"
            );
            destroy_quietly(&*session, tag).await;
            on_failure(JoinFailure::ReadyTimeout);
            return None;
        }
    }

    Some(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_transition_log_filters_unimportant() {
        let mut log = TransitionLog::default();
        let now = Instant::now();
        assert!(!log.should_log(SessionStatus::Signalling, SessionStatus::Connecting, now));
        assert!(!log.should_log(SessionStatus::Ready, SessionStatus::Ready, now));
        assert!(log.should_log(SessionStatus::Connecting, SessionStatus::Ready, now));
        assert!(log.should_log(SessionStatus::Ready, SessionStatus::Disconnected, now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_log_debounces_same_pair() {
        let mut log = TransitionLog::default();
        let start = Instant::now();
        let (from, to) = (SessionStatus::Ready, SessionStatus::Disconnected);

        assert!(log.should_log(from, to, start));
        assert!(!log.should_log(from, to, start + Duration::from_millis(1000)));
        assert!(log.should_log(from, to, start + Duration::from_millis(1600)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_log_different_pair_not_debounced() {
        let mut log = TransitionLog::default();
        let now = Instant::now();
        assert!(log.should_log(SessionStatus::Ready, SessionStatus::Disconnected, now));
        assert!(log.should_log(SessionStatus::Disconnected, SessionStatus::Connecting, now));
        assert!(log.should_log(SessionStatus::Ready, SessionStatus::Disconnected, now));
    }
}
