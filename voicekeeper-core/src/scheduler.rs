// ABOUTME: Periodic chat command cycles (leave, play, loop queue) for the music bot
// ABOUTME: Runs once immediately, then on a fixed interval, skipping firings while a cycle is in flight

use crate::config::Account;
use crate::error::ChatSendFailure;
use crate::traits::ChatTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// First command of every cycle: make the bot leave so the queue restarts clean
pub const LEAVE_COMMAND: &str = "m!leave";

/// Last command of every cycle: loop the whole queue
pub const LOOP_QUEUE_COMMAND: &str = "m!lq";

/// Pause between consecutive commands in one cycle
pub const STEP_DELAY: Duration = Duration::from_secs(10);

/// Marks a cycle in flight; the flag is released when the guard drops,
/// including when the cycle ends early on a send failure.
struct CycleGuard(Arc<AtomicBool>);

impl CycleGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Chat command schedule for one account
#[derive(Clone)]
pub struct PeriodicActions {
    chat: Arc<dyn ChatTransport>,
    tag: String,
    channel_id: String,
    payload: String,
    send_chat: bool,
    interval: Duration,
    step_delay: Duration,
    running: Arc<AtomicBool>,
}

impl PeriodicActions {
    pub fn new(chat: Arc<dyn ChatTransport>, account: &Account, tag: &str) -> Self {
        Self {
            chat,
            tag: tag.to_string(),
            channel_id: account.target_channel_id.clone(),
            payload: account.chat_payload.clone(),
            send_chat: account.send_chat,
            interval: account.action_interval(),
            step_delay: STEP_DELAY,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }

    /// The three commands of one cycle, in send order
    pub fn commands(&self) -> [&str; 3] {
        [LEAVE_COMMAND, self.payload.as_str(), LOOP_QUEUE_COMMAND]
    }

    /// Whether a cycle is currently in flight
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run the immediate cycle, then one cycle per interval, forever.
    pub async fn run(self) {
        if !self.send_chat {
            tracing::info!(account = %self.tag, "Chat commands disabled for this account");
            return;
        }

        if let Some(guard) = CycleGuard::acquire(&self.running) {
            if let Err(e) = self.run_cycle().await {
                tracing::error!(account = %self.tag, error = %e, "Initial chat cycle failed");
            }
            drop(guard);
        }

        if self.interval.is_zero() {
            tracing::warn!(account = %self.tag, "Chat interval is zero, recurring cycles disabled");
            return;
        }

        tracing::info!(
            account = %self.tag,
            interval_secs = self.interval.as_secs(),
            "Chat schedule armed"
        );
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.fire();
        }
    }

    /// Start a cycle on its own task unless one is still in flight.
    ///
    /// A skipped firing is dropped, not queued.
    pub fn fire(&self) -> Option<JoinHandle<()>> {
        let Some(guard) = CycleGuard::acquire(&self.running) else {
            tracing::debug!(account = %self.tag, "Previous chat cycle still running, skipping");
            return None;
        };

        let this = self.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = this.run_cycle().await {
                tracing::error!(account = %this.tag, error = %e, "Interval chat cycle failed");
            }
        }))
    }

    /// Send leave, payload and loop-queue with a pause between each.
    ///
    /// Stops at the first failing send.
    pub async fn run_cycle(&self) -> Result<(), ChatSendFailure> {
        let [first, second, third] = self.commands();
        self.send(first).await?;
        tokio::time::sleep(self.step_delay).await;
        self.send(second).await?;
        tokio::time::sleep(self.step_delay).await;
        self.send(third).await
    }

    async fn send(&self, text: &str) -> Result<(), ChatSendFailure> {
        let channel = self
            .chat
            .resolve_channel(&self.channel_id)
            .await
            .map_err(|source| ChatSendFailure::Resolve {
                channel_id: self.channel_id.clone(),
                source,
            })?;

        if !channel.supports_text() {
            return Err(ChatSendFailure::NotText(self.channel_id.clone()));
        }

        channel
            .send(text)
            .await
            .map_err(|source| ChatSendFailure::Send {
                channel_id: self.channel_id.clone(),
                source,
            })?;

        tracing::info!(account = %self.tag, channel = %self.channel_id, command = %text, "Sent chat command");
        Ok(())
    }
}
