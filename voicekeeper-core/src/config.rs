// ABOUTME: Resolves accounts and orchestrator settings from a flat key/value environment map
// ABOUTME: Supports numbered accounts (TOKEN_1, TOKEN_2, ...) or a single unsuffixed account

use crate::expr;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Label used for the account built from unsuffixed keys
pub const DEFAULT_ACCOUNT_ID: &str = "default";

/// Default chat payload sent between the leave and loop-queue commands
pub const DEFAULT_PLAYLIST: &str = "m!p https://www.youtube.com/watch?v=dQw4w9WgXcQ";

/// Default period between recurring chat cycles (11 hours)
pub const DEFAULT_ACTION_INTERVAL_MS: u64 = 11 * 60 * 60 * 1000;

/// One configured identity.
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    /// Numeric suffix of the keys this account came from, or "default"
    pub id: String,
    pub credential: String,
    pub target_group_id: String,
    pub target_channel_id: String,
    pub send_chat: bool,
    pub action_interval_ms: u64,
    pub chat_payload: String,
    pub self_deafen: bool,
    pub self_mute: bool,
}

// Custom Debug impl to redact the credential
impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("credential", &"[REDACTED]")
            .field("target_group_id", &self.target_group_id)
            .field("target_channel_id", &self.target_channel_id)
            .field("send_chat", &self.send_chat)
            .field("action_interval_ms", &self.action_interval_ms)
            .field("chat_payload", &self.chat_payload)
            .field("self_deafen", &self.self_deafen)
            .field("self_mute", &self.self_mute)
            .finish()
    }
}

impl Account {
    /// An account can only run with a credential and a full target.
    pub fn is_eligible(&self) -> bool {
        !self.credential.is_empty()
            && !self.target_group_id.is_empty()
            && !self.target_channel_id.is_empty()
    }

    pub fn action_interval(&self) -> Duration {
        Duration::from_millis(self.action_interval_ms)
    }

    /// Build the account for `suffix` (`None` = unsuffixed keys).
    pub fn from_env(suffix: Option<u64>, env: &HashMap<String, String>) -> Self {
        let key_suffix = suffix.map(|n| format!("_{n}")).unwrap_or_default();
        let get = |name: &str| env.get(&format!("{name}{key_suffix}")).map(String::as_str);
        let text = |name: &str| get(name).map(str::trim).unwrap_or_default().to_string();

        Self {
            id: suffix
                .map(|n| n.to_string())
                .unwrap_or_else(|| DEFAULT_ACCOUNT_ID.to_string()),
            credential: text("TOKEN"),
            target_group_id: text("GUILD_ID"),
            target_channel_id: text("VOICE_CHANNEL_ID"),
            send_chat: parse_bool_env(get("SEND_CHAT"), true),
            action_interval_ms: parse_interval_env(get("INTERVAL"), DEFAULT_ACTION_INTERVAL_MS),
            chat_payload: get("PLAYLIST")
                .filter(|v| !v.is_empty())
                .unwrap_or(DEFAULT_PLAYLIST)
                .to_string(),
            self_deafen: parse_bool_env(get("SELFDEAF"), false),
            self_mute: parse_bool_env(get("SELFMUTE"), false),
        }
    }
}

/// Parse a boolean flag, falling back to `default` on absence or garbage.
pub fn parse_bool_env(value: Option<&str>, default: bool) -> bool {
    let Some(raw) = value else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}

/// Parse a millisecond interval, falling back to `default` on absence or garbage.
///
/// Accepts a plain integer or a restricted arithmetic expression
/// (`2*60*60*1000`). Negative results clamp to zero and fractions truncate.
pub fn parse_interval_env(value: Option<&str>, default: u64) -> u64 {
    let raw = match value.map(str::trim) {
        None | Some("") => return default,
        Some(raw) => raw,
    };

    if raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.parse().unwrap_or(default);
    }

    let allowed = |c: char| c.is_ascii_digit() || c.is_ascii_whitespace() || "+-*/()".contains(c);
    if !raw.chars().all(allowed) {
        return default;
    }

    match expr::evaluate(raw) {
        Ok(value) if value <= 0.0 => 0,
        Ok(value) => value.trunc().min(u64::MAX as f64) as u64,
        Err(e) => {
            tracing::warn!(value = %raw, error = %e, "Cannot parse interval, using default");
            default
        }
    }
}

/// Numeric suffixes that have a `TOKEN_N` key, ascending.
///
/// Returns `[None]` for a single unsuffixed account when no numbered keys
/// exist but any unsuffixed account key does.
pub fn account_suffixes(env: &HashMap<String, String>) -> Vec<Option<u64>> {
    let numbered: BTreeSet<u64> = env
        .keys()
        .filter_map(|key| key.strip_prefix("TOKEN_"))
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|digits| digits.parse().ok())
        .collect();

    if !numbered.is_empty() {
        return numbered.into_iter().map(Some).collect();
    }

    let has_unsuffixed = ["TOKEN", "GUILD_ID", "VOICE_CHANNEL_ID"]
        .iter()
        .any(|key| env.contains_key(*key));
    if has_unsuffixed {
        vec![None]
    } else {
        Vec::new()
    }
}

/// Build every eligible account from the env map, in suffix order.
///
/// Ineligible accounts are dropped without a log line; callers warn when the
/// result is empty.
pub fn resolve_accounts(env: &HashMap<String, String>) -> Vec<Account> {
    account_suffixes(env)
        .into_iter()
        .map(|suffix| Account::from_env(suffix, env))
        .filter(Account::is_eligible)
        .collect()
}

/// Process-wide timing knobs for joins and reconnects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// How long to wait for a session to become ready (0 = do not wait)
    pub ready_timeout_ms: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub retry_jitter_ms: u64,
    /// Upper bound of the random delay before an account's first join (0 = none)
    pub connect_stagger_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 15_000,
            retry_base_ms: 5_000,
            retry_max_ms: 60_000,
            retry_jitter_ms: 1_000,
            connect_stagger_ms: 2_000,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_env(env: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| env.get(key).map(String::as_str);
        Self {
            ready_timeout_ms: parse_interval_env(
                get("VOICE_READY_TIMEOUT_MS"),
                defaults.ready_timeout_ms,
            ),
            retry_base_ms: parse_interval_env(get("VOICE_RETRY_BASE_MS"), defaults.retry_base_ms),
            retry_max_ms: parse_interval_env(get("VOICE_RETRY_MAX_MS"), defaults.retry_max_ms),
            retry_jitter_ms: parse_interval_env(
                get("VOICE_RETRY_JITTER_MS"),
                defaults.retry_jitter_ms,
            ),
            connect_stagger_ms: parse_interval_env(
                get("VOICE_CONNECT_STAGGER_MS"),
                defaults.connect_stagger_ms,
            ),
        }
    }

    pub fn ready_timeout(&self) -> Option<Duration> {
        (self.ready_timeout_ms > 0).then(|| Duration::from_millis(self.ready_timeout_ms))
    }
}
