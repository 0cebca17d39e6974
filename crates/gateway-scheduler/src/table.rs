use std::sync::Arc;

use dashmap::DashMap;
use gateway_core::types::{InboundEnvelope, SessionKey, TurnOutcome};
use gateway_diagnostics::{DiagnosticEvent, DiagnosticsBus};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::lane::{ConversationLane, EnqueueOutcome};
use crate::turn::{AgentTurnRunner, ReplySink};

const STUCK_SWEEP_INTERVAL_SECS: u64 = 60;

/// Registry of per-conversation lanes (spec §4.5). Each lane runs at most one
/// turn at a time; lanes themselves run concurrently, so fairness across
/// conversations falls out of tokio's own task scheduling rather than an
/// explicit round-robin.
pub struct LaneTable {
    lanes: DashMap<SessionKey, Arc<Mutex<ConversationLane>>>,
    runner: Arc<dyn AgentTurnRunner>,
    diagnostics: Arc<DiagnosticsBus>,
    stuck_after_ms: i64,
    stuck_grace_ms: i64,
}

impl LaneTable {
    pub fn new(
        runner: Arc<dyn AgentTurnRunner>,
        diagnostics: Arc<DiagnosticsBus>,
        stuck_after_ms: i64,
        stuck_grace_ms: i64,
    ) -> Self {
        Self {
            lanes: DashMap::new(),
            runner,
            diagnostics,
            stuck_after_ms,
            stuck_grace_ms,
        }
    }

    fn lane_for(&self, key: &SessionKey) -> Arc<Mutex<ConversationLane>> {
        self.lanes
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationLane::new(key.clone()))))
            .clone()
    }

    /// Enqueues `envelope` onto the lane for `key` and, if no turn is already
    /// running there, spawns one. Returns whether the message was queued
    /// standalone or coalesced into the pending item.
    pub async fn submit(
        self: &Arc<Self>,
        key: SessionKey,
        envelope: InboundEnvelope,
        now_ms: i64,
        debounce_window_ms: i64,
        reply: Arc<dyn ReplySink>,
    ) -> EnqueueOutcome {
        let message_id = envelope.message_id.clone();
        let lane_arc = self.lane_for(&key);
        let (outcome, should_drive, queue_size) = {
            let mut lane = lane_arc.lock().await;
            let outcome = lane.enqueue(envelope, now_ms, debounce_window_ms);
            (outcome, !lane.is_active(), lane.pending_len())
        };

        if outcome == EnqueueOutcome::Queued {
            let session_key = key.as_str().to_string();
            self.diagnostics.emit(DiagnosticEvent::MessageQueued {
                session_key: session_key.clone(),
                message_id,
            });
            self.diagnostics.emit(DiagnosticEvent::QueueLaneEnqueue {
                session_key,
                queue_size,
            });
        }

        if should_drive {
            self.clone().drive(key, lane_arc, reply);
        }
        outcome
    }

    fn drive(
        self: Arc<Self>,
        key: SessionKey,
        lane_arc: Arc<Mutex<ConversationLane>>,
        reply: Arc<dyn ReplySink>,
    ) {
        tokio::spawn(async move {
            let session_key = key.as_str().to_string();
            loop {
                let now_ms = chrono::Utc::now().timestamp_millis();
                let cancel = CancellationToken::new();
                let next = {
                    let mut lane = lane_arc.lock().await;
                    lane.try_dequeue(now_ms, cancel.clone())
                };
                let Some(envelope) = next else {
                    break;
                };

                let message_id = envelope.message_id.clone();
                let wait_ms = envelope
                    .enqueue_at_ms
                    .map(|enqueued_at| now_ms - enqueued_at)
                    .unwrap_or(0);
                let queue_size = {
                    let lane = lane_arc.lock().await;
                    lane.pending_len()
                };
                self.diagnostics.emit(DiagnosticEvent::QueueLaneDequeue {
                    session_key: session_key.clone(),
                    queue_size,
                    wait_ms,
                });
                self.diagnostics.emit(DiagnosticEvent::SessionState {
                    session_key: session_key.clone(),
                    state: "processing".to_string(),
                });

                let result = self
                    .runner
                    .run_turn(&key, envelope, reply.clone(), cancel)
                    .await;

                self.diagnostics.emit(DiagnosticEvent::SessionState {
                    session_key: session_key.clone(),
                    state: "idle".to_string(),
                });
                self.diagnostics.emit(DiagnosticEvent::MessageProcessed {
                    session_key: session_key.clone(),
                    message_id,
                    outcome: outcome_label(&result.outcome).to_string(),
                });

                let mut lane = lane_arc.lock().await;
                lane.complete_active();
                if lane.is_idle() {
                    self.lanes.remove(&key);
                    break;
                }
            }
        });
    }

    /// Background sweep for lanes whose active turn has run longer than
    /// `stuck_after_ms`. Runs until `shutdown` broadcasts `true`.
    pub async fn run_stuck_sweep(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("lane table stuck-sweep started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(STUCK_SWEEP_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("lane table stuck-sweep shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Two-phase stuck-lane handling (spec §4.5, scenario S7): the first
    /// sweep past `stuck_after_ms` only emits `session.stuck` and marks the
    /// lane. A later sweep force-cancels once the lane has stayed marked for
    /// `stuck_grace_ms`, so detection and cancellation are observably
    /// distinct events rather than one combined step.
    async fn sweep_once(&self) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        for entry in self.lanes.iter() {
            let mut lane = entry.value().lock().await;
            let Some(elapsed) = lane.active_duration_ms(now_ms) else {
                continue;
            };
            if elapsed < self.stuck_after_ms {
                continue;
            }

            if !lane.is_marked_stuck() {
                warn!(session_key = %entry.key(), elapsed_ms = elapsed, "lane turn stuck");
                lane.mark_stuck(now_ms);
                self.diagnostics.emit(DiagnosticEvent::SessionStuck {
                    session_key: entry.key().as_str().to_string(),
                    state: "processing".to_string(),
                    age_ms: elapsed,
                    queue_depth: lane.pending_len(),
                });
            } else if lane.stuck_elapsed_ms(now_ms).unwrap_or(0) >= self.stuck_grace_ms {
                warn!(session_key = %entry.key(), elapsed_ms = elapsed, "cancelling stuck turn after grace");
                lane.cancel_active();
            }
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }
}

/// Maps a turn outcome to the literal strings `message.processed` payloads
/// use (spec §4.5, scenario S3).
fn outcome_label(outcome: &TurnOutcome) -> &'static str {
    match outcome {
        TurnOutcome::Success => "ok",
        TurnOutcome::Error { .. } => "error",
        TurnOutcome::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_core::types::{
        AgentId, Channel, ChatType, CommandAuthorized, PeerKind, TextBlock, TurnOutcome, TurnResult,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct CountingRunner {
        calls: AtomicUsize,
        notify: Notify,
    }

    #[async_trait]
    impl AgentTurnRunner for CountingRunner {
        async fn run_turn(
            &self,
            _session_key: &SessionKey,
            _envelope: InboundEnvelope,
            _reply: Arc<dyn ReplySink>,
            _cancel: CancellationToken,
        ) -> TurnResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
            TurnResult {
                outcome: TurnOutcome::Success,
                tokens_in: 0,
                tokens_out: 0,
                duration_ms: 0,
                model: None,
            }
        }
    }

    struct NullSink;

    #[async_trait]
    impl ReplySink for NullSink {
        async fn send_block(&self, _block: TextBlock) {}
        async fn send_media(&self, _block: gateway_core::types::MediaBlock) {}
        async fn send_reaction(&self, _directive: gateway_core::types::ReactionDirective) {}
        async fn send_typing(&self, _directive: gateway_core::types::TypingDirective) {}
        async fn finalize(&self) {}
    }

    fn envelope() -> InboundEnvelope {
        InboundEnvelope {
            message_id: Some("m1".to_string()),
            channel: Channel::Telegram,
            account_id: "acct".to_string(),
            chat_type: ChatType::Direct,
            chat_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            sender_display_name: None,
            body: "hi".to_string(),
            raw_body: "hi".to_string(),
            command_body: "hi".to_string(),
            media_refs: Vec::new(),
            mentions: Vec::new(),
            reply_context: None,
            received_at_ms: 0,
            provider_sent_at_ms: None,
            command_authorized: CommandAuthorized::Unknown,
            originating_channel: Channel::Telegram,
            originating_to: "c1".to_string(),
            enqueue_at_ms: None,
            topic_id: None,
        }
    }

    fn key() -> SessionKey {
        SessionKey::conversation(&AgentId::main(), Channel::Telegram, PeerKind::Dm, "c1", None)
    }

    #[tokio::test]
    async fn submitted_message_is_run_exactly_once() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            notify: Notify::new(),
        });
        let table = Arc::new(LaneTable::new(
            runner.clone(),
            Arc::new(DiagnosticsBus::new()),
            60_000,
            60_000,
        ));
        table
            .submit(key(), envelope(), 0, 0, Arc::new(NullSink))
            .await;

        tokio::time::timeout(Duration::from_secs(1), runner.notify.notified())
            .await
            .expect("runner was not invoked in time");
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lane_is_removed_once_drained() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            notify: Notify::new(),
        });
        let table = Arc::new(LaneTable::new(
            runner.clone(),
            Arc::new(DiagnosticsBus::new()),
            60_000,
            60_000,
        ));
        table
            .submit(key(), envelope(), 0, 0, Arc::new(NullSink))
            .await;
        tokio::time::timeout(Duration::from_secs(1), runner.notify.notified())
            .await
            .expect("runner was not invoked in time");

        // give the drive loop a chance to observe completion and remove the lane
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(table.lane_count(), 0);
    }

    #[tokio::test]
    async fn submit_emits_message_queued_and_lane_enqueue() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            notify: Notify::new(),
        });
        let diagnostics = Arc::new(DiagnosticsBus::new());
        let mut rx = diagnostics.subscribe();
        let table = Arc::new(LaneTable::new(runner, diagnostics, 60_000, 60_000));

        table
            .submit(key(), envelope(), 0, 0, Arc::new(NullSink))
            .await;

        let first = rx.recv().await.unwrap();
        assert!(
            matches!(&first, DiagnosticEvent::MessageQueued { message_id, .. } if message_id.as_deref() == Some("m1"))
        );
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second,
            DiagnosticEvent::QueueLaneEnqueue { queue_size: 1, .. }
        ));
    }

    #[tokio::test]
    async fn drive_emits_dequeue_state_and_processed_events_in_order() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            notify: Notify::new(),
        });
        let diagnostics = Arc::new(DiagnosticsBus::new());
        let mut rx = diagnostics.subscribe();
        let table = Arc::new(LaneTable::new(runner.clone(), diagnostics, 60_000, 60_000));

        table
            .submit(key(), envelope(), 0, 0, Arc::new(NullSink))
            .await;
        tokio::time::timeout(Duration::from_secs(1), runner.notify.notified())
            .await
            .expect("runner was not invoked in time");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }

        assert!(matches!(seen[0], DiagnosticEvent::MessageQueued { .. }));
        assert!(matches!(seen[1], DiagnosticEvent::QueueLaneEnqueue { .. }));
        assert!(matches!(seen[2], DiagnosticEvent::QueueLaneDequeue { .. }));
        assert!(
            matches!(&seen[3], DiagnosticEvent::SessionState { state, .. } if state == "processing")
        );
        assert!(
            matches!(&seen[4], DiagnosticEvent::SessionState { state, .. } if state == "idle")
        );
        match &seen[5] {
            DiagnosticEvent::MessageProcessed {
                message_id,
                outcome,
                ..
            } => {
                assert_eq!(message_id.as_deref(), Some("m1"));
                assert_eq!(outcome, "ok");
            }
            other => panic!("expected MessageProcessed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stuck_sweep_emits_once_then_cancels_after_grace() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            notify: Notify::new(),
        });
        let diagnostics = Arc::new(DiagnosticsBus::new());
        let mut rx = diagnostics.subscribe();
        // stuck_after_ms=0 so any active turn is immediately over threshold;
        // stuck_grace_ms=50 so the cancel happens on a later sweep, not the first.
        let table = LaneTable::new(runner, diagnostics, 0, 50);

        let lane_arc = Arc::new(Mutex::new(ConversationLane::new(key())));
        let token = CancellationToken::new();
        {
            let mut lane = lane_arc.lock().await;
            lane.enqueue(envelope(), 0, 0);
            lane.try_dequeue(0, token.clone());
        }
        table.lanes.insert(key(), lane_arc.clone());

        table.sweep_once().await;
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, DiagnosticEvent::SessionStuck { .. }));
        assert!(lane_arc.lock().await.is_marked_stuck());
        assert!(!token.is_cancelled(), "first sweep should only mark, not cancel");

        table.sweep_once().await;
        assert!(
            rx.try_recv().is_err(),
            "no second SessionStuck emission expected within the grace window"
        );
        assert!(!token.is_cancelled(), "still within grace window");

        tokio::time::sleep(Duration::from_millis(60)).await;
        table.sweep_once().await;
        assert!(token.is_cancelled(), "cancel expected once grace has elapsed");
    }
}
