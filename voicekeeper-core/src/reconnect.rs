// ABOUTME: Per-account reconnect state machine with exponential backoff and jitter
// ABOUTME: Retries 5s, 10s, 20s... up to 60s (plus jitter), resetting only on a ready session

use crate::config::{Account, OrchestratorSettings};
use crate::scheduler::PeriodicActions;
use crate::supervisor::{self, FailureCallback};
use crate::traits::{ChatTransport, SessionEvent, SessionStatus, VoiceSession, VoiceTransport};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Backoff configuration for voice reconnects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap for the exponential part of the delay
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the random delay added to every retry
    pub jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
        }
    }
}

impl From<&OrchestratorSettings> for BackoffConfig {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.retry_base_ms),
            max_delay: Duration::from_millis(settings.retry_max_ms),
            jitter: Duration::from_millis(settings.retry_jitter_ms),
        }
    }
}

/// Tracks consecutive failures with exponential backoff
#[derive(Debug)]
pub struct BackoffState {
    config: BackoffConfig,
    attempt: u32,
}

impl BackoffState {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Record a confirmed ready session (resets backoff)
    pub fn record_success(&mut self) {
        self.attempt = 0;
    }

    /// Delay for the next retry without jitter: `min(base * 2^attempt, max)`
    pub fn base_delay(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.config
            .base_delay
            .checked_mul(factor)
            .map_or(self.config.max_delay, |delay| delay.min(self.config.max_delay))
    }

    /// Record a failure and return the delay before the next retry
    pub fn record_failure(&mut self) -> Duration {
        let delay = self.base_delay() + self.sample_jitter();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of retries scheduled since the last success
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn sample_jitter(&self) -> Duration {
        let jitter_ms = self.config.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

/// Where an account's connection lifecycle currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No session and nothing scheduled
    Idle,
    /// A join attempt is in flight
    Connecting,
    /// A session was handed over and is being watched
    Connected,
    /// The connection failed and a retry timer is armed
    RetryPending,
}

/// Mutable connection bookkeeping, owned by exactly one machine
struct ConnectionState {
    phase: Phase,
    session: Option<Arc<dyn VoiceSession>>,
    watcher: Option<JoinHandle<()>>,
    backoff: BackoffState,
    retry_at: Option<Instant>,
}

/// Keeps one account present in its voice channel for the process lifetime.
///
/// Failure signals (session errors, disconnects, ready timeouts) arrive on an
/// internal queue and are coalesced into at most one pending retry. Joins run
/// inline on the machine's own task, so at most one is ever in flight.
pub struct ReconnectMachine {
    account: Account,
    tag: String,
    group_label: String,
    voice: Arc<dyn VoiceTransport>,
    ready_timeout: Option<Duration>,
    stagger: Duration,
    /// Taken when the first session becomes ready
    actions: Option<PeriodicActions>,
    state: ConnectionState,
    failures_tx: mpsc::UnboundedSender<String>,
    failures_rx: mpsc::UnboundedReceiver<String>,
}

impl ReconnectMachine {
    /// `tag` names the logged-in identity in logs; `group_prefix` scopes the
    /// voice group label (`<prefix>-<account id>`).
    pub fn new(
        account: Account,
        tag: impl Into<String>,
        group_prefix: &str,
        voice: Arc<dyn VoiceTransport>,
        chat: Arc<dyn ChatTransport>,
        settings: &OrchestratorSettings,
    ) -> Self {
        let tag = tag.into();
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            group_label: format!("{}-{}", group_prefix, account.id),
            actions: Some(PeriodicActions::new(chat, &account, &tag)),
            account,
            tag,
            voice,
            ready_timeout: settings.ready_timeout(),
            stagger: Duration::from_millis(settings.connect_stagger_ms),
            state: ConnectionState {
                phase: Phase::Idle,
                session: None,
                watcher: None,
                backoff: BackoffState::new(BackoffConfig::from(settings)),
                retry_at: None,
            },
            failures_tx,
            failures_rx,
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.state.backoff.attempt()
    }

    pub fn has_pending_retry(&self) -> bool {
        self.state.retry_at.is_some()
    }

    pub fn retry_deadline(&self) -> Option<Instant> {
        self.state.retry_at
    }

    pub fn has_session(&self) -> bool {
        self.state.session.is_some()
    }

    pub fn actions_started(&self) -> bool {
        self.actions.is_none()
    }

    pub fn group_label(&self) -> &str {
        &self.group_label
    }

    /// Run on its own task for the rest of the process lifetime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Stagger, join, then keep reacting to failures and retry timers forever.
    pub async fn run(mut self) {
        self.stagger().await;
        self.connect().await;
        loop {
            self.step().await;
        }
    }

    /// Wait for the next failure signal or retry deadline and handle it.
    pub async fn step(&mut self) {
        let retry_at = self.state.retry_at;
        tokio::select! {
            Some(reason) = self.failures_rx.recv() => {
                self.schedule_reconnect(&reason);
            }
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                self.state.retry_at = None;
                self.connect().await;
            }
        }
    }

    async fn stagger(&self) {
        let stagger_ms = self.stagger.as_millis() as u64;
        if stagger_ms == 0 {
            return;
        }
        let wait_ms = rand::thread_rng().gen_range(0..stagger_ms);
        if wait_ms > 0 {
            tracing::info!(
                account = %self.tag,
                group = %self.group_label,
                wait_ms,
                "Staggering voice join"
            );
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
    }

    /// Replace the current session with a fresh join attempt.
    ///
    /// No-op while another attempt is in flight.
    pub async fn connect(&mut self) {
        if self.state.phase == Phase::Connecting {
            return;
        }
        self.state.phase = Phase::Connecting;

        self.release_session().await;

        let joined = supervisor::attempt_join(
            &*self.voice,
            &self.account,
            &self.tag,
            &self.group_label,
            self.ready_timeout,
            self.failure_callback(),
        )
        .await;

        match joined {
            Some(session) => self.on_ready(session),
            None => {
                self.state.phase = Phase::Idle;
                // Reasons reported by the failed attempt go first, "join-failed" coalesces
                while let Ok(reason) = self.failures_rx.try_recv() {
                    self.schedule_reconnect(&reason);
                }
                self.schedule_reconnect("join-failed");
            }
        }
    }

    /// Arm a single retry timer unless one is already pending.
    ///
    /// Returns the chosen delay, or `None` when coalesced into a pending retry.
    pub fn schedule_reconnect(&mut self, reason: &str) -> Option<Duration> {
        if self.state.retry_at.is_some() {
            tracing::debug!(account = %self.tag, reason, "Retry already pending");
            return None;
        }

        let delay = self.state.backoff.record_failure();
        self.state.retry_at = Some(Instant::now() + delay);
        if self.state.phase != Phase::Connecting {
            self.state.phase = Phase::RetryPending;
        }

        tracing::info!(
            account = %self.tag,
            group = %self.group_label,
            reason,
            delay_ms = delay.as_millis() as u64,
            attempt = self.state.backoff.attempt(),
            "Reconnect scheduled"
        );
        Some(delay)
    }

    fn on_ready(&mut self, session: Arc<dyn VoiceSession>) {
        self.state.backoff.record_success();
        if self.state.retry_at.take().is_some() {
            tracing::debug!(account = %self.tag, "Cancelled pending retry");
        }
        // Signals raised before ready belong to the attempt that just succeeded
        while self.failures_rx.try_recv().is_ok() {}

        self.state.watcher = Some(watch_session(&session, self.failures_tx.clone()));
        self.state.session = Some(session);
        self.state.phase = Phase::Connected;

        if let Some(actions) = self.actions.take() {
            tracing::info!(account = %self.tag, group = %self.group_label, "Starting chat schedule");
            tokio::spawn(actions.run());
        }
    }

    async fn release_session(&mut self) {
        if let Some(watcher) = self.state.watcher.take() {
            watcher.abort();
        }
        if let Some(session) = self.state.session.take() {
            supervisor::destroy_quietly(&*session, &self.tag).await;
        }
    }

    fn failure_callback(&self) -> FailureCallback {
        let tx = self.failures_tx.clone();
        Arc::new(move |failure| {
            let _ = tx.send(failure.to_string());
        })
    }
}

/// Report `state-<status>` whenever a handed-over session is lost.
fn watch_session(
    session: &Arc<dyn VoiceSession>,
    failures: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    let mut events = session.subscribe();
    let current = session.status();

    tokio::spawn(async move {
        if current.is_lost() {
            let _ = failures.send(format!("state-{current}"));
            return;
        }
        loop {
            match events.recv().await {
                Ok(SessionEvent::StateChange { to, .. }) if to.is_lost() => {
                    let _ = failures.send(format!("state-{to}"));
                    if to == SessionStatus::Destroyed {
                        break;
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_ms: u64, max_ms: u64, jitter_ms: u64) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter: Duration::from_millis(jitter_ms),
        }
    }

    #[test]
    fn test_default_backoff_config() {
        let config = BackoffConfig::default();
        assert_eq!(config.base_delay, Duration::from_secs(5));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert_eq!(config.jitter, Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_backoff_sequence_without_jitter() {
        let mut state = BackoffState::new(config(5_000, 60_000, 0));

        assert_eq!(state.record_failure(), Duration::from_secs(5));
        assert_eq!(state.record_failure(), Duration::from_secs(10));
        assert_eq!(state.record_failure(), Duration::from_secs(20));
        assert_eq!(state.record_failure(), Duration::from_secs(40));
        // Capped
        assert_eq!(state.record_failure(), Duration::from_secs(60));
        assert_eq!(state.record_failure(), Duration::from_secs(60));

        assert_eq!(state.attempt(), 6);
    }

    #[test]
    fn test_jittered_delays_stay_in_bounds() {
        let mut state = BackoffState::new(BackoffConfig::default());
        let mut previous_floor = Duration::ZERO;

        for n in 1..=10u32 {
            let floor = Duration::from_millis((5_000u64 << (n - 1)).min(60_000));
            let delay = state.record_failure();
            assert!(delay >= floor, "attempt {n}: {delay:?} < {floor:?}");
            assert!(
                delay < floor + Duration::from_secs(1),
                "attempt {n}: {delay:?} too large"
            );
            assert!(floor >= previous_floor);
            previous_floor = floor;
        }
    }

    #[test]
    fn test_success_resets_backoff() {
        let mut state = BackoffState::new(config(1_000, 60_000, 0));
        state.record_failure();
        state.record_failure();
        state.record_failure();
        assert_eq!(state.attempt(), 3);

        state.record_success();
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.record_failure(), Duration::from_secs(1));
    }

    #[test]
    fn test_huge_attempt_counts_saturate_at_cap() {
        let mut state = BackoffState::new(config(5_000, 60_000, 0));
        for _ in 0..100 {
            state.record_failure();
        }
        assert_eq!(state.base_delay(), Duration::from_secs(60));
    }
}
