// ABOUTME: Scripted fake voice and chat transports shared by the integration tests
// ABOUTME: Records joins, destroys and sent messages behind Arc<Mutex<..>> for assertions

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use voicekeeper_core::{
    Account, ChatChannel, ChatTransport, JoinRequest, SessionEvent, SessionStatus, VoiceSession,
    VoiceTransport,
};

pub fn test_account(id: &str, credential: &str) -> Account {
    Account {
        id: id.to_string(),
        credential: credential.to_string(),
        target_group_id: "guild-1".to_string(),
        target_channel_id: "voice-1".to_string(),
        send_chat: true,
        action_interval_ms: 60 * 60 * 1000,
        chat_payload: "m!p test-playlist".to_string(),
        self_deafen: true,
        self_mute: false,
    }
}

// =============================================================================
// Voice
// =============================================================================

/// Session whose status is driven by the test
pub struct FakeSession {
    status: Mutex<SessionStatus>,
    events: broadcast::Sender<SessionEvent>,
    destroy_calls: AtomicUsize,
    fail_destroy: bool,
}

impl FakeSession {
    pub fn new(initial: SessionStatus) -> Arc<Self> {
        Self::build(initial, false)
    }

    pub fn with_failing_destroy(initial: SessionStatus) -> Arc<Self> {
        Self::build(initial, true)
    }

    fn build(initial: SessionStatus, fail_destroy: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            status: Mutex::new(initial),
            events,
            destroy_calls: AtomicUsize::new(0),
            fail_destroy,
        })
    }

    pub fn set_status(&self, to: SessionStatus) {
        let from = std::mem::replace(&mut *self.status.lock().unwrap(), to);
        if from != to {
            let _ = self.events.send(SessionEvent::StateChange { from, to });
        }
    }

    pub fn emit_error(&self, message: &str) {
        let _ = self.events.send(SessionEvent::Error(message.to_string()));
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceSession for FakeSession {
    fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap()
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn destroy(&self) -> Result<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.set_status(SessionStatus::Destroyed);
        if self.fail_destroy {
            return Err(anyhow!("already destroyed"));
        }
        Ok(())
    }
}

/// What the next join attempt does
#[derive(Debug, Clone, Copy)]
pub enum JoinScript {
    /// `join` itself errors (e.g. channel cannot be resolved)
    Fail,
    /// Session is ready immediately
    Ready,
    /// Session never becomes ready
    Hang,
    /// Session becomes ready after the delay
    ReadyAfter(Duration),
    /// Session is ready immediately but errors when destroyed
    ReadyBrittle,
}

pub struct FakeVoice {
    script: Mutex<VecDeque<JoinScript>>,
    fallback: JoinScript,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    requests: Mutex<Vec<(Instant, JoinRequest)>>,
}

impl FakeVoice {
    pub fn new(script: impl IntoIterator<Item = JoinScript>, fallback: JoinScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            sessions: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn join_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn join_times(&self) -> Vec<Instant> {
        self.requests.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    pub fn requests(&self) -> Vec<JoinRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn session(&self, index: usize) -> Arc<FakeSession> {
        Arc::clone(&self.sessions.lock().unwrap()[index])
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl VoiceTransport for FakeVoice {
    async fn join(&self, request: &JoinRequest) -> Result<Arc<dyn VoiceSession>> {
        self.requests
            .lock()
            .unwrap()
            .push((Instant::now(), request.clone()));

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        let session = match step {
            JoinScript::Fail => return Err(anyhow!("unknown channel {}", request.channel_id)),
            JoinScript::Ready => FakeSession::new(SessionStatus::Ready),
            JoinScript::ReadyBrittle => FakeSession::with_failing_destroy(SessionStatus::Ready),
            JoinScript::Hang => FakeSession::new(SessionStatus::Signalling),
            JoinScript::ReadyAfter(delay) => {
                let session = FakeSession::new(SessionStatus::Signalling);
                let pending = Arc::clone(&session);
                tokio::spawn(async move {
                    pending.set_status(SessionStatus::Connecting);
                    tokio::time::sleep(delay).await;
                    pending.set_status(SessionStatus::Ready);
                });
                session
            }
        };

        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}

// =============================================================================
// Chat
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub at: Instant,
    pub channel_id: String,
    pub text: String,
}

#[derive(Default)]
struct ChatLog {
    sent: Vec<SentMessage>,
    fail_on: Option<String>,
}

/// Chat transport that records every sent message
pub struct FakeChat {
    log: Arc<Mutex<ChatLog>>,
    supports_text: bool,
    fail_resolve: bool,
}

impl FakeChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(ChatLog::default())),
            supports_text: true,
            fail_resolve: false,
        })
    }

    pub fn voice_only() -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(ChatLog::default())),
            supports_text: false,
            fail_resolve: false,
        })
    }

    pub fn unresolvable() -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(ChatLog::default())),
            supports_text: true,
            fail_resolve: true,
        })
    }

    /// Make every send of exactly `text` fail
    pub fn fail_on(&self, text: &str) {
        self.log.lock().unwrap().fail_on = Some(text.to_string());
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.log.lock().unwrap().sent.clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.text).collect()
    }
}

struct FakeChannel {
    id: String,
    supports_text: bool,
    log: Arc<Mutex<ChatLog>>,
}

#[async_trait]
impl ChatChannel for FakeChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_text(&self) -> bool {
        self.supports_text
    }

    async fn send(&self, text: &str) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.fail_on.as_deref() == Some(text) {
            return Err(anyhow!("missing permissions"));
        }
        log.sent.push(SentMessage {
            at: Instant::now(),
            channel_id: self.id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for FakeChat {
    async fn resolve_channel(&self, channel_id: &str) -> Result<Box<dyn ChatChannel>> {
        if self.fail_resolve {
            return Err(anyhow!("unknown channel {channel_id}"));
        }
        Ok(Box::new(FakeChannel {
            id: channel_id.to_string(),
            supports_text: self.supports_text,
            log: Arc::clone(&self.log),
        }))
    }
}
