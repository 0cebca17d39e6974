use std::collections::VecDeque;

use gateway_core::types::{InboundEnvelope, SessionKey};
use tokio_util::sync::CancellationToken;

/// Result of a single `enqueue` call, surfaced for diagnostics/tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    Coalesced,
}

/// Per-conversation FIFO queue with debounce coalescing (spec §4.5). At most
/// one turn is ever active for a given lane; everything else waits here.
pub struct ConversationLane {
    key: SessionKey,
    queue: VecDeque<InboundEnvelope>,
    last_enqueued_at_ms: Option<i64>,
    active_since_ms: Option<i64>,
    active_cancel: Option<CancellationToken>,
    /// When the active turn first crossed the stuck threshold, set by the
    /// sweeper. Cleared on completion. A second sweep pass force-cancels once
    /// this has aged past the grace window (spec §4.5).
    stuck_since_ms: Option<i64>,
}

impl ConversationLane {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            queue: VecDeque::new(),
            last_enqueued_at_ms: None,
            active_since_ms: None,
            active_cancel: None,
            stuck_since_ms: None,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Adds a message to the lane. When `debounce_window_ms` is positive and
    /// the most recently queued (not yet dequeued) message is from the same
    /// sender and still within the window, the two are merged instead of
    /// queuing a second item: bodies are newline-joined, mentions unioned,
    /// media concatenated, and the newer envelope's metadata wins.
    pub fn enqueue(
        &mut self,
        mut envelope: InboundEnvelope,
        now_ms: i64,
        debounce_window_ms: i64,
    ) -> EnqueueOutcome {
        envelope.enqueue_at_ms = Some(now_ms);

        if debounce_window_ms > 0 {
            if let (Some(last_at), Some(pending)) =
                (self.last_enqueued_at_ms, self.queue.back_mut())
            {
                if now_ms - last_at <= debounce_window_ms && pending.sender_id == envelope.sender_id
                {
                    pending.body = format!("{}\n{}", pending.body, envelope.body);
                    pending.raw_body = format!("{}\n{}", pending.raw_body, envelope.raw_body);
                    pending.command_body =
                        format!("{}\n{}", pending.command_body, envelope.command_body);
                    for mention in envelope.mentions {
                        if !pending.mentions.contains(&mention) {
                            pending.mentions.push(mention);
                        }
                    }
                    pending.media_refs.extend(envelope.media_refs);
                    pending.message_id = envelope.message_id;
                    pending.received_at_ms = envelope.received_at_ms;
                    pending.provider_sent_at_ms = envelope.provider_sent_at_ms;
                    pending.reply_context = envelope.reply_context;
                    pending.command_authorized = envelope.command_authorized;
                    pending.topic_id = envelope.topic_id;
                    pending.enqueue_at_ms = Some(now_ms);
                    self.last_enqueued_at_ms = Some(now_ms);
                    return EnqueueOutcome::Coalesced;
                }
            }
        }

        self.queue.push_back(envelope);
        self.last_enqueued_at_ms = Some(now_ms);
        EnqueueOutcome::Queued
    }

    /// Pops the next item if no turn is currently active. Marks the lane
    /// active and stamps `active_since_ms` for the stuck-lane sweep.
    pub fn try_dequeue(&mut self, now_ms: i64, cancel: CancellationToken) -> Option<InboundEnvelope> {
        if self.active_since_ms.is_some() {
            return None;
        }
        let item = self.queue.pop_front()?;
        self.active_since_ms = Some(now_ms);
        self.active_cancel = Some(cancel);
        Some(item)
    }

    pub fn complete_active(&mut self) {
        self.active_since_ms = None;
        self.active_cancel = None;
        self.stuck_since_ms = None;
    }

    pub fn is_active(&self) -> bool {
        self.active_since_ms.is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.active_since_ms.is_none() && self.queue.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// How long the active turn (if any) has been running, in ms.
    pub fn active_duration_ms(&self, now_ms: i64) -> Option<i64> {
        self.active_since_ms.map(|started| now_ms - started)
    }

    /// Requests cooperative cancellation of the active turn, if any. Returns
    /// whether a turn was actually signaled.
    pub fn cancel_active(&self) -> bool {
        match &self.active_cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// True once the sweeper has already flagged this lane's active turn as
    /// stuck (so `session.stuck` is emitted only once per stuck episode).
    pub fn is_marked_stuck(&self) -> bool {
        self.stuck_since_ms.is_some()
    }

    pub fn mark_stuck(&mut self, now_ms: i64) {
        self.stuck_since_ms = Some(now_ms);
    }

    /// How long since this lane was flagged stuck, if it has been.
    pub fn stuck_elapsed_ms(&self, now_ms: i64) -> Option<i64> {
        self.stuck_since_ms.map(|since| now_ms - since)
    }
}
