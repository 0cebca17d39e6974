use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tagged union of every observable point in the gateway (spec §3). Every
/// component may construct and publish one; subscribers (the diagnostics
/// exporter, §4.9) receive a read-only copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    ModelUsage {
        session_key: String,
        model: String,
        tokens_in: u64,
        tokens_out: u64,
        duration_ms: u64,
    },
    WebhookReceived {
        source: String,
    },
    WebhookProcessed {
        source: String,
        duration_ms: u64,
    },
    WebhookError {
        source: String,
        error: String,
    },
    MessageQueued {
        session_key: String,
        message_id: Option<String>,
    },
    MessageProcessed {
        session_key: String,
        message_id: Option<String>,
        outcome: String,
    },
    QueueLaneEnqueue {
        session_key: String,
        queue_size: usize,
    },
    QueueLaneDequeue {
        session_key: String,
        queue_size: usize,
        wait_ms: i64,
    },
    SessionState {
        session_key: String,
        state: String,
    },
    SessionStuck {
        session_key: String,
        state: String,
        age_ms: i64,
        queue_depth: usize,
    },
    RunAttempt {
        session_key: String,
        attempt: u32,
        outcome: String,
    },
    DiagnosticHeartbeat {
        timestamp_ms: i64,
    },
    /// Escape hatch for adapter-specific events (e.g.
    /// `relay.circuit_breaker.*` transitions, spec §4.1) that don't warrant
    /// their own named variant yet.
    Custom {
        name: String,
        payload: Value,
    },
}
