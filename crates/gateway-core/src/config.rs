use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

pub const DEFAULT_DEBOUNCE_MS: u64 = 0;
pub const DEFAULT_HISTORICAL_GRACE_MS: i64 = 30_000;
pub const DEFAULT_DEDUPE_CAPACITY: usize = 10_000;
pub const DEFAULT_DEDUPE_TTL_SECS: i64 = 600;
pub const DEFAULT_CONVERSATION_REF_CAPACITY: usize = 1_000;
pub const DEFAULT_CONVERSATION_REF_TTL_DAYS: i64 = 365;
pub const DEFAULT_PAIRING_TTL_SECS: i64 = 24 * 3_600;
pub const DEFAULT_LANE_IDLE_SECS: i64 = 5 * 60;
pub const DEFAULT_STUCK_LANE_SWEEP_SECS: u64 = 60;
pub const DEFAULT_STUCK_LANE_THRESHOLD_SECS: i64 = 10 * 60;
/// Grace period after `session.stuck` is emitted before the lane is
/// force-cancelled (spec §4.5: "after a configurable grace").
pub const DEFAULT_STUCK_LANE_GRACE_SECS: i64 = 60;
pub const DEFAULT_READ_THROUGH_CACHE_TTL_SECS: i64 = 5;

/// `channels.<ch>.dmPolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    Open,
    #[default]
    Pairing,
    Allowlist,
    Disabled,
}

/// `channels.<ch>.groupPolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    #[default]
    Open,
    Allowlist,
    Disabled,
}

/// `messages.chunkMode.<ch>` — the splitting strategy applied during
/// dispatch, independent of the per-channel character limit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    #[default]
    MarkdownAware,
    Plain,
}

/// `messages.markdownTableMode.<ch>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TableMode {
    Code,
    Plain,
    #[default]
    Preserve,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActionsConfig {
    #[serde(default)]
    pub reactions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_cb_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_cb_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_cb_jitter")]
    pub jitter_fraction: f64,
    #[serde(default = "default_cb_failures")]
    pub failure_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_cb_base_ms(),
            backoff_cap_ms: default_cb_cap_ms(),
            jitter_fraction: default_cb_jitter(),
            failure_threshold: default_cb_failures(),
        }
    }
}

fn default_cb_base_ms() -> u64 {
    1_000
}
fn default_cb_cap_ms() -> u64 {
    60_000
}
fn default_cb_jitter() -> f64 {
    0.30
}
fn default_cb_failures() -> u32 {
    5
}

/// Per-channel policy configuration (spec §6 configuration surface table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub dm_policy: DmPolicy,
    #[serde(default)]
    pub group_policy: GroupPolicy,
    #[serde(default)]
    pub require_mention: bool,
    #[serde(default)]
    pub allow_from: Vec<String>,
    #[serde(default)]
    pub group_allow_from: Vec<String>,
    #[serde(default)]
    pub actions: ActionsConfig,
    /// Per-channel override of the global historical-suppression grace
    /// window (spec §9 open question: the canonical value is not stated to
    /// be uniform across adapters).
    pub historical_suppression_grace_ms: Option<i64>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub chunk_mode: ChunkMode,
    #[serde(default)]
    pub markdown_table_mode: TableMode,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            dm_policy: DmPolicy::default(),
            group_policy: GroupPolicy::default(),
            require_mention: false,
            allow_from: Vec::new(),
            group_allow_from: Vec::new(),
            actions: ActionsConfig::default(),
            historical_suppression_grace_ms: None,
            circuit_breaker: CircuitBreakerConfig::default(),
            chunk_mode: ChunkMode::default(),
            markdown_table_mode: TableMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessagesConfig {
    /// `messages.debounceMs` — default lane debounce window; per-channel
    /// values may be layered in by callers via `ChannelConfig` extensions.
    #[serde(default)]
    pub debounce_ms: u64,
}

/// `agents.list` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    #[serde(default)]
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentDefaults {
    pub workspace: Option<String>,
}

/// `agents.defaults`, `agents.list`, plus the routing tables the Session
/// Router (§4.6) consults in order: explicit tuple route, then per-channel
/// group-routing table (wildcard `*` allowed), then `main`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentsConfig {
    #[serde(default)]
    pub defaults: AgentDefaults,
    #[serde(default)]
    pub list: Vec<AgentEntry>,
    /// Keyed by `"<channel>:<accountId>:<chatId>"`.
    #[serde(default)]
    pub explicit_routes: HashMap<String, String>,
    /// Keyed by channel name, then by chat id (or `"*"`).
    #[serde(default)]
    pub group_routes: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            channels: HashMap::new(),
            messages: MessagesConfig::default(),
            agents: AgentsConfig::default(),
        }
    }
}

fn default_state_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.openclaw")
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.openclaw/gateway.toml")
}

impl GatewayConfig {
    /// Load config from a TOML file with `GATEWAY_*` env var overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: GatewayConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("GATEWAY_").split("__"))
            .extract()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn channel(&self, channel: &str) -> ChannelConfig {
        self.channels.get(channel).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_pairing_dm_policy() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.channel("telegram").dm_policy, DmPolicy::Pairing);
    }

    #[test]
    fn load_from_toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            r#"
            [channels.telegram]
            dm_policy = "open"
            require_mention = true
            "#,
        )
        .unwrap();

        let cfg = GatewayConfig::load(Some(path.to_str().unwrap())).unwrap();
        let telegram = cfg.channel("telegram");
        assert_eq!(telegram.dm_policy, DmPolicy::Open);
        assert!(telegram.require_mention);
    }
}
