// ABOUTME: Discord adapters for the core transports: songbird voice sessions and serenity chat
// ABOUTME: Runs one gateway client per active account and starts its reconnect machine on first ready

use anyhow::{anyhow, bail, Context as _, Result};
use async_trait::async_trait;
use serenity::all::{
    Channel, ChannelId, ChannelType, Client, Context, EventHandler, GatewayIntents, GuildId, Http,
    Ready,
};
use songbird::{CoreEvent, Event, EventContext, SerenityInit, Songbird};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use voicekeeper_core::{
    Account, ChatChannel, ChatTransport, JoinRequest, OrchestratorSettings, ReconnectMachine,
    SessionEvent, SessionStatus, VoiceSession, VoiceTransport,
};

fn parse_snowflake(kind: &str, raw: &str) -> Result<u64> {
    let id: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid {kind} id {raw:?}"))?;
    if id == 0 {
        bail!("invalid {kind} id 0");
    }
    Ok(id)
}

// =============================================================================
// Voice
// =============================================================================

struct SessionShared {
    status: Mutex<SessionStatus>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionShared {
    fn status(&self) -> SessionStatus {
        self.status
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionStatus::Destroyed)
    }

    /// Move to `to` unless already destroyed; emits a state change when it differs.
    fn transition(&self, to: SessionStatus) {
        let Ok(mut status) = self.status.lock() else {
            return;
        };
        let from = *status;
        if from == to || from == SessionStatus::Destroyed {
            return;
        }
        *status = to;
        drop(status);
        let _ = self.events.send(SessionEvent::StateChange { from, to });
    }

    fn error(&self, message: String) {
        let _ = self.events.send(SessionEvent::Error(message));
    }
}

/// Relays songbird driver events into session state changes
struct StatusRelay {
    shared: Weak<SessionShared>,
    to: SessionStatus,
}

#[async_trait]
impl songbird::EventHandler for StatusRelay {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let Some(shared) = self.shared.upgrade() else {
            return Some(Event::Cancel);
        };
        shared.transition(self.to);
        None
    }
}

/// One voice connection driven by songbird
pub struct DiscordSession {
    shared: Arc<SessionShared>,
    manager: Arc<Songbird>,
    guild_id: GuildId,
    join_task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl VoiceSession for DiscordSession {
    fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    async fn destroy(&self) -> Result<()> {
        if let Some(task) = self.join_task.lock().ok().and_then(|mut t| t.take()) {
            task.abort();
        }
        self.shared.transition(SessionStatus::Destroyed);
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| anyhow!("leave failed: {e}"))
    }
}

pub struct DiscordVoice {
    manager: Arc<Songbird>,
}

impl DiscordVoice {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceTransport for DiscordVoice {
    async fn join(&self, request: &JoinRequest) -> Result<Arc<dyn VoiceSession>> {
        let guild_id = GuildId::new(parse_snowflake("guild", &request.group_id)?);
        let channel_id = ChannelId::new(parse_snowflake("channel", &request.channel_id)?);

        let (events, _) = broadcast::channel(32);
        let shared = Arc::new(SessionShared {
            status: Mutex::new(SessionStatus::Signalling),
            events,
        });

        let manager = Arc::clone(&self.manager);
        let relay = Arc::clone(&shared);
        let (self_deafen, self_mute) = (request.self_deafen, request.self_mute);
        let join_task = tokio::spawn(async move {
            relay.transition(SessionStatus::Connecting);
            let call = match manager.join(guild_id, channel_id).await {
                Ok(call) => call,
                Err(e) => {
                    relay.error(e.to_string());
                    relay.transition(SessionStatus::Disconnected);
                    return;
                }
            };

            let mut handler = call.lock().await;
            for (event, to) in [
                (CoreEvent::DriverDisconnect, SessionStatus::Disconnected),
                (CoreEvent::DriverConnect, SessionStatus::Ready),
                (CoreEvent::DriverReconnect, SessionStatus::Ready),
            ] {
                handler.add_global_event(
                    Event::Core(event),
                    StatusRelay {
                        shared: Arc::downgrade(&relay),
                        to,
                    },
                );
            }
            if let Err(e) = handler.deafen(self_deafen).await {
                tracing::warn!(error = %e, "Cannot set self-deafen");
            }
            if let Err(e) = handler.mute(self_mute).await {
                tracing::warn!(error = %e, "Cannot set self-mute");
            }
            drop(handler);

            relay.transition(SessionStatus::Ready);
        });

        Ok(Arc::new(DiscordSession {
            shared,
            manager: Arc::clone(&self.manager),
            guild_id,
            join_task: Mutex::new(Some(join_task)),
        }))
    }
}

// =============================================================================
// Chat
// =============================================================================

/// Voice channels carry their own text chat, so they count as text-capable
fn supports_text(kind: ChannelType) -> bool {
    matches!(
        kind,
        ChannelType::Text
            | ChannelType::News
            | ChannelType::Voice
            | ChannelType::Stage
            | ChannelType::NewsThread
            | ChannelType::PublicThread
            | ChannelType::PrivateThread
    )
}

struct DiscordChannel {
    id: String,
    channel_id: ChannelId,
    supports_text: bool,
    http: Arc<Http>,
}

#[async_trait]
impl ChatChannel for DiscordChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_text(&self) -> bool {
        self.supports_text
    }

    async fn send(&self, text: &str) -> Result<()> {
        self.channel_id.say(&self.http, text).await?;
        Ok(())
    }
}

pub struct DiscordChat {
    http: Arc<Http>,
}

impl DiscordChat {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChatTransport for DiscordChat {
    async fn resolve_channel(&self, channel_id: &str) -> Result<Box<dyn ChatChannel>> {
        let id = ChannelId::new(parse_snowflake("channel", channel_id)?);
        let supports_text = match id.to_channel(&self.http).await? {
            Channel::Guild(channel) => supports_text(channel.kind),
            Channel::Private(_) => true,
            _ => false,
        };

        Ok(Box::new(DiscordChannel {
            id: channel_id.to_string(),
            channel_id: id,
            supports_text,
            http: Arc::clone(&self.http),
        }))
    }
}

// =============================================================================
// Gateway
// =============================================================================

struct GatewayHandler {
    account: Account,
    settings: OrchestratorSettings,
    manager: Arc<Songbird>,
    started: AtomicBool,
}

#[async_trait]
impl EventHandler for GatewayHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        let tag = ready.user.tag();
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::debug!(account = %tag, "Gateway ready again, machine already running");
            return;
        }
        tracing::info!(account = %tag, id = %self.account.id, "Logged in");

        let group_prefix = format!("acc-{}", ready.user.id);
        let machine = ReconnectMachine::new(
            self.account.clone(),
            &tag,
            &group_prefix,
            Arc::new(DiscordVoice::new(Arc::clone(&self.manager))),
            Arc::new(DiscordChat::new(Arc::clone(&ctx.http))),
            &self.settings,
        );
        machine.spawn();
    }
}

/// Log in as `account` and keep its gateway connection running.
pub async fn run_account(account: Account, settings: OrchestratorSettings) -> Result<()> {
    let manager = Songbird::serenity();
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let token = account.credential.clone();
    let id = account.id.clone();

    let mut client = Client::builder(&token, intents)
        .event_handler(GatewayHandler {
            account,
            settings,
            manager: Arc::clone(&manager),
            started: AtomicBool::new(false),
        })
        .register_songbird_with(manager)
        .await
        .with_context(|| format!("cannot build gateway client for account {id}"))?;

    client
        .start()
        .await
        .with_context(|| format!("gateway client for account {id} stopped"))
}
