use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_admission::{AdmissionContext, AdmissionController, AdmissionDecision, DedupeSet, PairingOutcome};
use gateway_channels::{Channel as ChannelAdapter, ChannelManager, InboundSink, SendOpts};
use gateway_core::config::{
    ChannelConfig, GatewayConfig, DEFAULT_DEDUPE_CAPACITY, DEFAULT_DEDUPE_TTL_SECS,
    DEFAULT_STUCK_LANE_GRACE_SECS, DEFAULT_STUCK_LANE_THRESHOLD_SECS,
};
use gateway_core::types::{Channel, InboundEnvelope};
use gateway_diagnostics::DiagnosticsBus;
use gateway_dispatch::{DispatchSettings, ReplyDispatcher};
use gateway_router::SessionRouter;
use gateway_scheduler::{AgentTurnRunner, LaneTable};
use gateway_stores::{AllowFromStore, PairingStore};
use tracing::{info, warn};

/// Per-channel state the admission pipeline needs, built once at startup
/// from the configured channel list (spec §4.8 persisted state layout).
struct ChannelRuntime {
    dm_allow_from: AllowFromStore,
    group_allow_from: AllowFromStore,
    pairing_store: PairingStore,
    bot_identity: String,
}

/// Bundles every in-scope component wired together at startup (spec §1,
/// §2): admission, routing, scheduling, dispatch, stores, diagnostics.
/// Channel transports and the Agent Turn Runner are external collaborators
/// — the caller supplies them rather than this type constructing them.
pub struct GatewayApp {
    config: GatewayConfig,
    diagnostics: Arc<DiagnosticsBus>,
    channels: Arc<ChannelManager>,
    lane_table: Arc<LaneTable>,
    admission: Arc<AdmissionController>,
    runtimes: DashMap<Channel, Arc<ChannelRuntime>>,
    connected_at_ms: i64,
}

impl GatewayApp {
    pub fn new(
        config: GatewayConfig,
        turn_runner: Arc<dyn AgentTurnRunner>,
        bot_identities: &HashMap<Channel, String>,
        connected_at_ms: i64,
    ) -> Self {
        let diagnostics = Arc::new(DiagnosticsBus::new());
        let channels = Arc::new(ChannelManager::new(diagnostics.clone()));
        let stuck_after_ms = DEFAULT_STUCK_LANE_THRESHOLD_SECS * 1_000;
        let stuck_grace_ms = DEFAULT_STUCK_LANE_GRACE_SECS * 1_000;
        let lane_table = Arc::new(LaneTable::new(
            turn_runner,
            diagnostics.clone(),
            stuck_after_ms,
            stuck_grace_ms,
        ));
        let dedupe = DedupeSet::new(DEFAULT_DEDUPE_CAPACITY, DEFAULT_DEDUPE_TTL_SECS * 1_000);
        let admission = Arc::new(AdmissionController::new(dedupe, diagnostics.clone()));

        let state_dir = std::path::PathBuf::from(&config.state_dir);
        let runtimes = DashMap::new();
        for name in config.channels.keys() {
            if let Ok(channel) = Channel::from_str(name) {
                let runtime = ChannelRuntime {
                    dm_allow_from: AllowFromStore::open(&state_dir, name),
                    group_allow_from: AllowFromStore::open(&state_dir, &format!("{name}-groups")),
                    pairing_store: PairingStore::open(&state_dir, name),
                    bot_identity: bot_identities.get(&channel).cloned().unwrap_or_default(),
                };
                runtimes.insert(channel, Arc::new(runtime));
            } else {
                warn!(channel = %name, "ignoring unrecognized channel in config");
            }
        }

        Self {
            config,
            diagnostics,
            channels,
            lane_table,
            admission,
            runtimes,
            connected_at_ms,
        }
    }

    pub fn state_dir(&self) -> &str {
        &self.config.state_dir
    }

    pub fn diagnostics(&self) -> Arc<DiagnosticsBus> {
        self.diagnostics.clone()
    }

    pub fn channels(&self) -> Arc<ChannelManager> {
        self.channels.clone()
    }

    pub fn lane_table(&self) -> Arc<LaneTable> {
        self.lane_table.clone()
    }

    /// Begins ingestion on every registered channel adapter, wiring each
    /// normalized envelope through admission, routing, and the scheduler.
    pub async fn start(self: &Arc<Self>) {
        let sink: Arc<dyn InboundSink> = Arc::new(GatewaySink { app: self.clone() });
        self.channels.start_all(sink).await;
    }

    pub async fn stop(&self) {
        self.channels.stop_all().await;
    }
}

struct GatewaySink {
    app: Arc<GatewayApp>,
}

#[async_trait]
impl InboundSink for GatewaySink {
    async fn emit(&self, envelope: InboundEnvelope) {
        let Some(runtime) = self
            .app
            .runtimes
            .get(&envelope.channel)
            .map(|entry| entry.clone())
        else {
            warn!(channel = %envelope.channel, "no runtime configured for channel, dropping envelope");
            return;
        };

        let channel_config = self.app.config.channel(&envelope.channel.to_string());
        let now_ms = chrono::Utc::now().timestamp_millis();
        let channel_id_line = format!("{}:{}", envelope.channel, envelope.sender_id);

        let ctx = AdmissionContext {
            channel_config: &channel_config,
            bot_identity: &runtime.bot_identity,
            allow_self_chat: false,
            connected_at_ms: self.app.connected_at_ms,
            now_ms,
            dm_allow_from: &runtime.dm_allow_from,
            group_allow_from: &runtime.group_allow_from,
            pairing_store: &runtime.pairing_store,
            channel_id_line: &channel_id_line,
        };

        let decision = match self.app.admission.evaluate(&envelope, &ctx) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "admission pipeline failed, dropping envelope");
                return;
            }
        };

        match decision {
            AdmissionDecision::Admit => self.dispatch(envelope, now_ms, &channel_config).await,
            AdmissionDecision::PairingInvoked(PairingOutcome::CodeIssued { reply_text, .. }) => {
                self.reply_directly(&envelope, &reply_text).await;
            }
            AdmissionDecision::PairingInvoked(PairingOutcome::AlreadyPending) => {}
            other => {
                info!(channel = %envelope.channel, decision = ?other, "envelope not admitted");
            }
        }
    }
}

impl GatewaySink {
    async fn dispatch(&self, envelope: InboundEnvelope, now_ms: i64, channel_config: &ChannelConfig) {
        let Some(adapter) = self.app.channels.get(envelope.channel) else {
            warn!(channel = %envelope.channel, "no adapter registered, cannot reply");
            return;
        };

        let peer = envelope.peer(None);
        let (session_key, _agent_id) = SessionRouter::new(&self.app.config.agents).route(&peer);

        let settings = DispatchSettings {
            chunk_mode: channel_config.chunk_mode,
            table_mode: channel_config.markdown_table_mode,
            reactions_enabled: channel_config.actions.reactions,
            ..DispatchSettings::default()
        };
        let reply = Arc::new(ReplyDispatcher::new(
            peer,
            adapter,
            self.app.diagnostics.clone(),
            settings,
        ));

        self.app
            .lane_table
            .submit(
                session_key,
                envelope,
                now_ms,
                self.app.config.messages.debounce_ms as i64,
                reply,
            )
            .await;
    }

    async fn reply_directly(&self, envelope: &InboundEnvelope, text: &str) {
        if let Some(adapter) = self.app.channels.get(envelope.channel) {
            let peer = envelope.peer(None);
            if let Err(e) = adapter.send_text(&peer, text, &SendOpts::default()).await {
                warn!(error = %e, "failed to send pairing reply");
            }
        }
    }
}
