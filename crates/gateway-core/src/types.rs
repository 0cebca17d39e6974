use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Enumerated chat platform tag. Closed set — adding a channel means adding
/// a variant here, which forces every `match` in the dispatch/admission
/// layers to be updated too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    WhatsApp,
    Telegram,
    Discord,
    Teams,
    DingTalk,
    Zalo,
    Nostr,
    Twitch,
    Web,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::WhatsApp => "whatsapp",
            Channel::Telegram => "telegram",
            Channel::Discord => "discord",
            Channel::Teams => "teams",
            Channel::DingTalk => "dingtalk",
            Channel::Zalo => "zalo",
            Channel::Nostr => "nostr",
            Channel::Twitch => "twitch",
            Channel::Web => "web",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Channel {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "whatsapp" => Ok(Channel::WhatsApp),
            "telegram" => Ok(Channel::Telegram),
            "discord" => Ok(Channel::Discord),
            "teams" => Ok(Channel::Teams),
            "dingtalk" => Ok(Channel::DingTalk),
            "zalo" => Ok(Channel::Zalo),
            "nostr" => Ok(Channel::Nostr),
            "twitch" => Ok(Channel::Twitch),
            "web" => Ok(Channel::Web),
            other => Err(GatewayError::InvalidEnvelope {
                reason: format!("unknown channel: {other}"),
            }),
        }
    }
}

/// Whether an inbound message arrived in a 1:1 chat or a multi-party one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
}

/// The conversational addressee a `SessionKey` is deterministically derived
/// from. `Kind` mirrors the segment used in the canonical session key string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    Dm,
    Group,
    Channel,
    Thread,
}

impl fmt::Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerKind::Dm => "dm",
            PeerKind::Group => "group",
            PeerKind::Channel => "channel",
            PeerKind::Thread => "thread",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PeerKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dm" => Ok(PeerKind::Dm),
            "group" => Ok(PeerKind::Group),
            "channel" => Ok(PeerKind::Channel),
            "thread" => Ok(PeerKind::Thread),
            other => Err(GatewayError::InvalidEnvelope {
                reason: format!("unknown peer kind: {other}"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub kind: PeerKind,
    pub id: String,
    pub account_id: String,
    pub channel: Channel,
    /// Topic/thread id within `id`, when the channel supports sub-threads
    /// (e.g. Telegram forum topics, Discord threads).
    pub topic_id: Option<String>,
}

/// Identifies the agent instance that owns a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn main() -> Self {
        Self("main".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The decoded form of a `SessionKey`, as returned by `SessionKey::parse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionScope {
    /// `agent:<agentId>:<channel>:<kind>:<id>[:topic:<topicId>]`
    Conversation {
        agent_id: AgentId,
        channel: Channel,
        kind: PeerKind,
        id: String,
        topic_id: Option<String>,
    },
    /// `agent:<agentId>:subagent:<slug>`
    SubAgent { agent_id: AgentId, slug: String },
    /// `agent:<agentId>:cron:<jobId>`
    Cron { agent_id: AgentId, job_id: String },
}

/// Canonical per-conversation identifier — the sole key used to serialize
/// work in the scheduler. Comparable by byte equality; never parsed except
/// for diagnostics/introspection, so routing code should hold the `Peer`
/// that produced it rather than re-deriving one by parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn conversation(
        agent_id: &AgentId,
        channel: Channel,
        kind: PeerKind,
        id: &str,
        topic_id: Option<&str>,
    ) -> Self {
        let mut s = format!("agent:{agent_id}:{channel}:{kind}:{id}");
        if let Some(topic) = topic_id {
            s.push_str(&format!(":topic:{topic}"));
        }
        Self(s)
    }

    pub fn subagent(agent_id: &AgentId, slug: &str) -> Self {
        Self(format!("agent:{agent_id}:subagent:{slug}"))
    }

    pub fn cron(agent_id: &AgentId, job_id: &str) -> Self {
        Self(format!("agent:{agent_id}:cron:{job_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode a canonical key back into its components. Round-trips with
    /// the constructors above: `SessionKey::parse(key.as_str())` always
    /// succeeds for any key this type produced.
    pub fn parse(s: &str) -> Result<SessionScope> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 3 || parts[0] != "agent" {
            return Err(GatewayError::InvalidEnvelope {
                reason: format!("session key missing 'agent' prefix: {s}"),
            });
        }
        let agent_id = AgentId(parts[1].to_string());

        match parts.get(2) {
            Some(&"subagent") => {
                let slug = parts.get(3).ok_or_else(|| GatewayError::InvalidEnvelope {
                    reason: format!("session key missing subagent slug: {s}"),
                })?;
                Ok(SessionScope::SubAgent {
                    agent_id,
                    slug: slug.to_string(),
                })
            }
            Some(&"cron") => {
                let job_id = parts.get(3).ok_or_else(|| GatewayError::InvalidEnvelope {
                    reason: format!("session key missing cron job id: {s}"),
                })?;
                Ok(SessionScope::Cron {
                    agent_id,
                    job_id: job_id.to_string(),
                })
            }
            Some(channel_str) => {
                let channel = Channel::from_str(channel_str)?;
                let kind_str = parts.get(3).ok_or_else(|| GatewayError::InvalidEnvelope {
                    reason: format!("session key missing kind: {s}"),
                })?;
                let kind = PeerKind::from_str(kind_str)?;
                let id = parts.get(4).ok_or_else(|| GatewayError::InvalidEnvelope {
                    reason: format!("session key missing id: {s}"),
                })?;
                let topic_id = match (parts.get(5), parts.get(6)) {
                    (Some(&"topic"), Some(topic)) => Some(topic.to_string()),
                    _ => None,
                };
                Ok(SessionScope::Conversation {
                    agent_id,
                    channel,
                    kind,
                    id: id.to_string(),
                    topic_id,
                })
            }
            None => Err(GatewayError::InvalidEnvelope {
                reason: format!("session key too short: {s}"),
            }),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to inbound media. `local_path` is owned by the gateway until
/// the turn that consumed it completes — cleanup happens then.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub local_path: String,
    pub content_type: String,
    pub origin_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyContext {
    pub id: String,
    pub body: String,
    pub sender_id: String,
}

/// Tri-state authorization flag for command-style messages — distinct from
/// `bool` because "not yet determined" is a real, meaningfully different
/// state from "determined to be false".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandAuthorized {
    True,
    False,
    Unknown,
}

/// The normalized form of any inbound message, produced by the Normalizer
/// (§4.2) and consumed by the Admission Controller (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub message_id: Option<String>,
    pub channel: Channel,
    pub account_id: String,
    pub chat_type: ChatType,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_display_name: Option<String>,
    pub body: String,
    pub raw_body: String,
    pub command_body: String,
    #[serde(default)]
    pub media_refs: Vec<MediaRef>,
    #[serde(default)]
    pub mentions: Vec<String>,
    pub reply_context: Option<ReplyContext>,
    pub received_at_ms: i64,
    /// Preserved separately from `received_at_ms` when the provider supplies
    /// a reliable send timestamp — used for historical-suppression (§4.3.2).
    pub provider_sent_at_ms: Option<i64>,
    pub command_authorized: CommandAuthorized,
    pub originating_channel: Channel,
    pub originating_to: String,
    /// Stamped once by the scheduler at enqueue time (§3 lifecycle note).
    pub enqueue_at_ms: Option<i64>,
    pub topic_id: Option<String>,
}

impl InboundEnvelope {
    pub fn peer(&self, account_id_override: Option<&str>) -> Peer {
        let kind = match self.chat_type {
            ChatType::Direct => PeerKind::Dm,
            ChatType::Group => PeerKind::Group,
        };
        Peer {
            kind,
            id: self.chat_id.clone(),
            account_id: account_id_override
                .map(str::to_string)
                .unwrap_or_else(|| self.account_id.clone()),
            channel: self.channel,
            topic_id: self.topic_id.clone(),
        }
    }
}

/// A single-use pairing code awaiting operator approval (spec §3, §4.4).
/// Exactly one open request per `(channel, peer_id)`; re-arrival of the
/// triggering message returns the same code idempotently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRequest {
    pub channel: Channel,
    pub peer_id: String,
    pub code: String,
    pub created_at_ms: i64,
    #[serde(default)]
    pub meta: std::collections::HashMap<String, String>,
}

/// Persisted record needed to initiate a proactive outbound message on a
/// webhook-driven channel. Subject to LRU+TTL eviction (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationReference {
    pub conversation_id: String,
    pub reference: serde_json::Value,
    pub last_seen_at_ms: i64,
}

/// Resumption record for one conversation, written by the scheduler on turn
/// completion (spec §4.8 `SessionStore`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub updated_at_ms: i64,
    pub last_provider: String,
    pub last_to: String,
}

/// One piece of agent-produced output, as consumed by the Reply Dispatcher
/// (spec §4.7, §6). The Agent Turn Runner is an external collaborator; this
/// crate defines only the shapes it's invoked with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaBlock {
    pub media: MediaRef,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionDirective {
    pub target_message_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypingDirective {
    Composing,
    Idle,
}

/// Terminal outcome of one Agent Turn Runner invocation (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnOutcome {
    Success,
    Error { reason: String },
    Cancelled,
}

/// Usage statistics published onto the diagnostics bus on turn completion
/// (spec §6 `TurnResult`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    pub outcome: TurnOutcome,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub duration_ms: u64,
    pub model: Option<String>,
}
