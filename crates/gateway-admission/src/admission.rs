use std::sync::Arc;

use gateway_core::config::{ChannelConfig, DEFAULT_HISTORICAL_GRACE_MS};
use gateway_core::types::{ChatType, InboundEnvelope};
use gateway_core::GatewayError;
use gateway_diagnostics::{DiagnosticEvent, DiagnosticsBus};
use gateway_stores::{AllowFromStore, PairingStore};

use crate::dedupe::DedupeSet;
use crate::pairing::{self, PairingOutcome};
use crate::policy::{check_dm_policy, check_group_policy, DmDecision};

/// Everything the admission pipeline needs besides the envelope itself and
/// the controller's own state. Bundled so `evaluate`'s signature stays
/// readable despite the five-step pipeline each needing different inputs.
pub struct AdmissionContext<'a> {
    pub channel_config: &'a ChannelConfig,
    pub bot_identity: &'a str,
    pub allow_self_chat: bool,
    pub connected_at_ms: i64,
    pub now_ms: i64,
    pub dm_allow_from: &'a AllowFromStore,
    pub group_allow_from: &'a AllowFromStore,
    pub pairing_store: &'a PairingStore,
    pub channel_id_line: &'a str,
}

/// Outcome of running the full fixed-order pipeline (spec §4.3) against one
/// envelope.
#[derive(Debug)]
pub enum AdmissionDecision {
    /// The envelope cleared every gate and should be handed to the scheduler.
    Admit,
    /// Already seen within the dedupe TTL.
    Duplicate,
    /// A historical (pre-reconnect) message, admitted for read-receipt
    /// purposes only (spec §4.3 item 2) — never for dispatch.
    HistoricalOnly,
    /// Sender is the bot's own identity.
    SelfMessage,
    /// A group or DM policy gate refused the envelope.
    Denied { reason: &'static str },
    /// DM pairing protocol was invoked; the envelope itself is dropped from
    /// dispatch (spec §4.3 item 5, §4.4).
    PairingInvoked(PairingOutcome),
}

pub struct AdmissionController {
    dedupe: DedupeSet,
    diagnostics: Arc<DiagnosticsBus>,
}

impl AdmissionController {
    pub fn new(dedupe: DedupeSet, diagnostics: Arc<DiagnosticsBus>) -> Self {
        Self { dedupe, diagnostics }
    }

    /// Run the fixed pipeline order: dedupe -> historical -> self ->
    /// group/DM policy gate (spec §4.3). Order is load-bearing — see the
    /// spec's rationale for why dedupe and historical suppression must run
    /// before any side-effecting policy decision.
    pub fn evaluate(
        &self,
        envelope: &InboundEnvelope,
        ctx: &AdmissionContext<'_>,
    ) -> Result<AdmissionDecision, GatewayError> {
        let diag_key = format!(
            "{}:{}:{}",
            envelope.channel, envelope.account_id, envelope.chat_id
        );

        if let Some(message_id) = &envelope.message_id {
            let dedupe_key = DedupeSet::key(&envelope.account_id, &envelope.chat_id, message_id);
            if self.dedupe.check_and_insert(&dedupe_key, ctx.now_ms) {
                self.diagnostics.emit(DiagnosticEvent::MessageProcessed {
                    session_key: diag_key,
                    message_id: Some(message_id.clone()),
                    outcome: "duplicate".to_string(),
                });
                return Ok(AdmissionDecision::Duplicate);
            }
        }

        if let Some(sent_at) = envelope.provider_sent_at_ms {
            if sent_at < ctx.connected_at_ms - DEFAULT_HISTORICAL_GRACE_MS {
                return Ok(AdmissionDecision::HistoricalOnly);
            }
        }

        if envelope.sender_id == ctx.bot_identity && !ctx.allow_self_chat {
            return Ok(AdmissionDecision::SelfMessage);
        }

        match envelope.chat_type {
            ChatType::Group => {
                let store_set = ctx.group_allow_from.all()?;
                let mentions_bot = envelope
                    .mentions
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case(ctx.bot_identity));
                match check_group_policy(
                    ctx.channel_config.group_policy,
                    &envelope.chat_id,
                    &ctx.channel_config.group_allow_from,
                    &store_set,
                    ctx.channel_config.require_mention,
                    mentions_bot,
                ) {
                    Ok(()) => Ok(AdmissionDecision::Admit),
                    Err(denial) => Ok(AdmissionDecision::Denied {
                        reason: denial.reason,
                    }),
                }
            }
            ChatType::Direct => {
                let store_set = ctx.dm_allow_from.all()?;
                match check_dm_policy(
                    ctx.channel_config.dm_policy,
                    &envelope.sender_id,
                    &ctx.channel_config.allow_from,
                    &store_set,
                ) {
                    DmDecision::Admit => Ok(AdmissionDecision::Admit),
                    DmDecision::Denied(denial) => Ok(AdmissionDecision::Denied {
                        reason: denial.reason,
                    }),
                    DmDecision::NeedsPairing => {
                        let outcome = pairing::request_pairing(
                            ctx.pairing_store,
                            envelope.channel,
                            &envelope.sender_id,
                            ctx.channel_id_line,
                            ctx.now_ms,
                        )?;
                        Ok(AdmissionDecision::PairingInvoked(outcome))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::config::{ChannelConfig, DmPolicy, GroupPolicy};
    use gateway_core::types::{Channel, CommandAuthorized};

    fn envelope(message_id: Option<&str>, sender_id: &str, chat_type: ChatType) -> InboundEnvelope {
        InboundEnvelope {
            message_id: message_id.map(str::to_string),
            channel: Channel::Telegram,
            account_id: "a1".to_string(),
            chat_type,
            chat_id: "c1".to_string(),
            sender_id: sender_id.to_string(),
            sender_display_name: None,
            body: "hello".to_string(),
            raw_body: "hello".to_string(),
            command_body: "hello".to_string(),
            media_refs: vec![],
            mentions: vec![],
            reply_context: None,
            received_at_ms: 0,
            provider_sent_at_ms: Some(0),
            command_authorized: CommandAuthorized::Unknown,
            originating_channel: Channel::Telegram,
            originating_to: "c1".to_string(),
            enqueue_at_ms: None,
            topic_id: None,
        }
    }

    fn controller() -> AdmissionController {
        AdmissionController::new(DedupeSet::new(10, 60_000), Arc::new(DiagnosticsBus::new()))
    }

    #[test]
    fn duplicate_message_id_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let ctrl = controller();
        let dm_allow = AllowFromStore::open(dir.path(), "telegram");
        let group_allow = AllowFromStore::open(dir.path(), "telegram-groups");
        let pairing_store = PairingStore::open(dir.path(), "telegram");
        let cfg = ChannelConfig {
            dm_policy: DmPolicy::Open,
            ..ChannelConfig::default()
        };
        let ctx = AdmissionContext {
            channel_config: &cfg,
            bot_identity: "bot",
            allow_self_chat: false,
            connected_at_ms: 0,
            now_ms: 0,
            dm_allow_from: &dm_allow,
            group_allow_from: &group_allow,
            pairing_store: &pairing_store,
            channel_id_line: "telegram:u1",
        };

        let env = envelope(Some("m1"), "u1", ChatType::Direct);
        assert!(matches!(
            ctrl.evaluate(&env, &ctx).unwrap(),
            AdmissionDecision::Admit
        ));
        assert!(matches!(
            ctrl.evaluate(&env, &ctx).unwrap(),
            AdmissionDecision::Duplicate
        ));
    }

    #[test]
    fn historical_message_is_admitted_for_read_receipt_only() {
        let dir = tempfile::tempdir().unwrap();
        let ctrl = controller();
        let dm_allow = AllowFromStore::open(dir.path(), "telegram");
        let group_allow = AllowFromStore::open(dir.path(), "telegram-groups");
        let pairing_store = PairingStore::open(dir.path(), "telegram");
        let cfg = ChannelConfig::default();
        let ctx = AdmissionContext {
            channel_config: &cfg,
            bot_identity: "bot",
            allow_self_chat: false,
            connected_at_ms: 100_000,
            now_ms: 100_000,
            dm_allow_from: &dm_allow,
            group_allow_from: &group_allow,
            pairing_store: &pairing_store,
            channel_id_line: "telegram:u1",
        };

        let mut env = envelope(Some("m1"), "u1", ChatType::Direct);
        env.provider_sent_at_ms = Some(100_000 - 60_000);
        assert!(matches!(
            ctrl.evaluate(&env, &ctx).unwrap(),
            AdmissionDecision::HistoricalOnly
        ));
    }

    #[test]
    fn self_message_is_dropped_unless_self_chat_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let ctrl = controller();
        let dm_allow = AllowFromStore::open(dir.path(), "telegram");
        let group_allow = AllowFromStore::open(dir.path(), "telegram-groups");
        let pairing_store = PairingStore::open(dir.path(), "telegram");
        let cfg = ChannelConfig::default();
        let ctx = AdmissionContext {
            channel_config: &cfg,
            bot_identity: "bot",
            allow_self_chat: false,
            connected_at_ms: 0,
            now_ms: 0,
            dm_allow_from: &dm_allow,
            group_allow_from: &group_allow,
            pairing_store: &pairing_store,
            channel_id_line: "telegram:bot",
        };

        let env = envelope(Some("m1"), "bot", ChatType::Direct);
        assert!(matches!(
            ctrl.evaluate(&env, &ctx).unwrap(),
            AdmissionDecision::SelfMessage
        ));
    }

    #[test]
    fn dm_pairing_is_invoked_for_unknown_sender() {
        let dir = tempfile::tempdir().unwrap();
        let ctrl = controller();
        let dm_allow = AllowFromStore::open(dir.path(), "telegram");
        let group_allow = AllowFromStore::open(dir.path(), "telegram-groups");
        let pairing_store = PairingStore::open(dir.path(), "telegram");
        let cfg = ChannelConfig {
            dm_policy: DmPolicy::Pairing,
            ..ChannelConfig::default()
        };
        let ctx = AdmissionContext {
            channel_config: &cfg,
            bot_identity: "bot",
            allow_self_chat: false,
            connected_at_ms: 0,
            now_ms: 0,
            dm_allow_from: &dm_allow,
            group_allow_from: &group_allow,
            pairing_store: &pairing_store,
            channel_id_line: "telegram:u1",
        };

        let env = envelope(Some("m1"), "u1", ChatType::Direct);
        match ctrl.evaluate(&env, &ctx).unwrap() {
            AdmissionDecision::PairingInvoked(PairingOutcome::CodeIssued { reply_text, .. }) => {
                assert!(reply_text.contains("Pairing code:"));
            }
            other => panic!("expected PairingInvoked(CodeIssued), got {other:?}"),
        }
    }

    #[test]
    fn group_policy_blocks_non_member() {
        let dir = tempfile::tempdir().unwrap();
        let ctrl = controller();
        let dm_allow = AllowFromStore::open(dir.path(), "telegram");
        let group_allow = AllowFromStore::open(dir.path(), "telegram-groups");
        let pairing_store = PairingStore::open(dir.path(), "telegram");
        let cfg = ChannelConfig {
            group_policy: GroupPolicy::Allowlist,
            ..ChannelConfig::default()
        };
        let ctx = AdmissionContext {
            channel_config: &cfg,
            bot_identity: "bot",
            allow_self_chat: false,
            connected_at_ms: 0,
            now_ms: 0,
            dm_allow_from: &dm_allow,
            group_allow_from: &group_allow,
            pairing_store: &pairing_store,
            channel_id_line: "telegram:g1",
        };

        let env = envelope(Some("m1"), "u1", ChatType::Group);
        match ctrl.evaluate(&env, &ctx).unwrap() {
            AdmissionDecision::Denied { reason } => assert_eq!(reason, "not in allowlist"),
            other => panic!("expected Denied, got {other:?}"),
        }
    }
}
