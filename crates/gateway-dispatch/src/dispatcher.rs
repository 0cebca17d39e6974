use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use gateway_channels::{Channel, SendOpts, TypingState};
use gateway_core::config::{ChunkMode, TableMode};
use gateway_core::types::{
    MediaBlock, Peer, ReactionDirective, TextBlock, TypingDirective,
};
use gateway_core::GatewayError;
use gateway_diagnostics::{DiagnosticEvent, DiagnosticsBus};
use gateway_scheduler::ReplySink;
use tokio::sync::Mutex;
use tracing::warn;

use crate::chunk::{chunk_limit, split_chunks};
use crate::markdown_table::rewrite_tables;

const RETRY_BASE_MS: u64 = 500;
const RETRY_CAP_MS: u64 = 30_000;
const RETRY_JITTER_FRACTION: f64 = 0.10;
const MAX_ATTEMPTS: u32 = 3;
const DEFAULT_MAX_MEDIA_BYTES: u64 = 5 * 1024 * 1024;

/// Per-channel knobs the dispatcher needs that aren't already carried by
/// `ChannelConfig` (media size ceiling is expressed in MB in config; this
/// keeps the dispatcher's own unit explicit).
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub chunk_mode: ChunkMode,
    pub table_mode: TableMode,
    pub reactions_enabled: bool,
    pub max_media_bytes: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            chunk_mode: ChunkMode::MarkdownAware,
            table_mode: TableMode::Preserve,
            reactions_enabled: false,
            max_media_bytes: DEFAULT_MAX_MEDIA_BYTES,
        }
    }
}

/// Renders Agent Turn Runner output into adapter calls for one conversation
/// (spec §4.7). Buffers text until a flush point, rewrites tables, chunks,
/// retries transient failures, and brackets non-trivial sends with typing
/// indicators.
pub struct ReplyDispatcher {
    peer: Peer,
    adapter: Arc<dyn Channel>,
    diagnostics: Arc<DiagnosticsBus>,
    settings: DispatchSettings,
    buffer: Mutex<String>,
    media_run_len: AtomicUsize,
}

impl ReplyDispatcher {
    pub fn new(
        peer: Peer,
        adapter: Arc<dyn Channel>,
        diagnostics: Arc<DiagnosticsBus>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            peer,
            adapter,
            diagnostics,
            settings,
            buffer: Mutex::new(String::new()),
            media_run_len: AtomicUsize::new(0),
        }
    }

    async fn append_and_maybe_flush(&self, text: &str) {
        let limit = chunk_limit(self.peer.channel);
        let mut buffer = self.buffer.lock().await;
        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(text);
        if buffer.len() > limit {
            let drained = std::mem::take(&mut *buffer);
            drop(buffer);
            self.flush_text(&drained, false).await;
        }
    }

    async fn flush_text(&self, text: &str, is_final: bool) {
        if text.trim().is_empty() {
            return;
        }
        self.media_run_len.store(0, Ordering::SeqCst);

        let rewritten = rewrite_tables(text, self.settings.table_mode);
        let limit = chunk_limit(self.peer.channel);
        let chunks = match self.settings.chunk_mode {
            ChunkMode::MarkdownAware => split_chunks(&rewritten, limit),
            ChunkMode::Plain => rewritten
                .as_bytes()
                .chunks(limit)
                .map(|c| String::from_utf8_lossy(c).to_string())
                .collect(),
        };

        let _ = self
            .adapter
            .send_typing(&self.peer, TypingState::Composing)
            .await;

        for (i, chunk) in chunks.iter().enumerate() {
            let opts = SendOpts {
                reply_to_message_id: None,
                is_final_chunk: is_final && i + 1 == chunks.len(),
            };
            self.send_with_retry(|| async {
                self.adapter.send_text(&self.peer, chunk, &opts).await
            })
            .await;
        }

        if is_final {
            let _ = self.adapter.send_typing(&self.peer, TypingState::Idle).await;
        }
    }

    async fn send_with_retry<F, Fut>(&self, mut attempt: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(), GatewayError>>,
    {
        let mut delay_ms = RETRY_BASE_MS;
        for attempt_no in 1..=MAX_ATTEMPTS {
            match attempt().await {
                Ok(()) => return,
                Err(e) if e.is_transient() => {
                    if attempt_no == MAX_ATTEMPTS {
                        warn!(error = %e, attempts = attempt_no, "dispatch send exhausted retries");
                        self.diagnostics.emit(DiagnosticEvent::Custom {
                            name: "dispatch.send_failed".to_string(),
                            payload: serde_json::json!({ "error": e.to_string() }),
                        });
                        return;
                    }
                    let sleep_ms = delay_ms + retry_jitter_ms(delay_ms, RETRY_JITTER_FRACTION);
                    tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;
                    delay_ms = (delay_ms * 2).min(RETRY_CAP_MS);
                }
                Err(e) => {
                    warn!(error = %e, "dispatch send failed permanently");
                    self.diagnostics.emit(DiagnosticEvent::Custom {
                        name: "dispatch.send_failed".to_string(),
                        payload: serde_json::json!({ "error": e.to_string() }),
                    });
                    return;
                }
            }
        }
    }
}

fn retry_jitter_ms(base_ms: u64, fraction: f64) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let max_jitter = ((base_ms as f64) * fraction) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}

#[async_trait]
impl ReplySink for ReplyDispatcher {
    async fn send_block(&self, block: TextBlock) {
        self.append_and_maybe_flush(&block.text).await;
    }

    async fn send_media(&self, block: MediaBlock) {
        let size = std::fs::metadata(&block.media.local_path)
            .map(|m| m.len())
            .unwrap_or(0);
        if size > self.settings.max_media_bytes {
            warn!(
                path = %block.media.local_path,
                size,
                max = self.settings.max_media_bytes,
                "media exceeds per-channel size limit, dropping"
            );
            self.diagnostics.emit(DiagnosticEvent::Custom {
                name: "dispatch.media_too_large".to_string(),
                payload: serde_json::json!({ "path": block.media.local_path, "size": size }),
            });
            return;
        }

        let run_index = self.media_run_len.fetch_add(1, Ordering::SeqCst);
        let caption = if run_index == 0 { block.caption.as_deref() } else { None };
        let opts = SendOpts::default();
        self.send_with_retry(|| async {
            self.adapter
                .send_media(&self.peer, &block.media, caption, &opts)
                .await
        })
        .await;
    }

    async fn send_reaction(&self, directive: ReactionDirective) {
        if !self.settings.reactions_enabled {
            warn!(
                target = %directive.target_message_id,
                "reaction gated off for this channel"
            );
            self.diagnostics.emit(DiagnosticEvent::Custom {
                name: "dispatch.reaction_denied".to_string(),
                payload: serde_json::json!({ "target": directive.target_message_id }),
            });
            return;
        }
        let _ = self
            .adapter
            .send_reaction(&self.peer, &directive.target_message_id, &directive.emoji)
            .await;
    }

    async fn send_typing(&self, directive: TypingDirective) {
        let state = match directive {
            TypingDirective::Composing => TypingState::Composing,
            TypingDirective::Idle => TypingState::Idle,
        };
        let _ = self.adapter.send_typing(&self.peer, state).await;
    }

    async fn finalize(&self) {
        let remaining = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut *buffer)
        };
        self.flush_text(&remaining, true).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::types::{Channel, MediaRef, PeerKind};
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingAdapter {
        texts: StdMutex<Vec<String>>,
        typing: StdMutex<Vec<TypingState>>,
        fail_first_n: AtomicU32,
    }

    #[async_trait]
    impl Channel for RecordingAdapter {
        fn name(&self) -> &str {
            "recording"
        }

        async fn start(&self, _sink: Arc<dyn gateway_channels::InboundSink>) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn send_text(&self, _peer: &Peer, text: &str, _opts: &SendOpts) -> Result<(), GatewayError> {
            if self.fail_first_n.load(Ordering::SeqCst) > 0 {
                self.fail_first_n.fetch_sub(1, Ordering::SeqCst);
                return Err(GatewayError::TransientError {
                    reason: "simulated".to_string(),
                });
            }
            self.texts.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_media(
            &self,
            _peer: &Peer,
            _media: &MediaRef,
            _caption: Option<&str>,
            _opts: &SendOpts,
        ) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn send_reaction(
            &self,
            _peer: &Peer,
            _target_message_id: &str,
            _emoji: &str,
        ) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn send_typing(&self, _peer: &Peer, state: TypingState) -> Result<(), GatewayError> {
            self.typing.lock().unwrap().push(state);
            Ok(())
        }
    }

    fn peer() -> Peer {
        Peer {
            kind: PeerKind::Dm,
            id: "c1".to_string(),
            account_id: "a1".to_string(),
            channel: Channel::Discord,
            topic_id: None,
        }
    }

    #[tokio::test]
    async fn finalize_flushes_buffered_text_once() {
        let adapter = Arc::new(RecordingAdapter::default());
        let dispatcher = ReplyDispatcher::new(
            peer(),
            adapter.clone(),
            Arc::new(DiagnosticsBus::new()),
            DispatchSettings::default(),
        );
        dispatcher.send_block(TextBlock { text: "hello".to_string() }).await;
        dispatcher.send_block(TextBlock { text: "world".to_string() }).await;
        dispatcher.finalize().await;

        let texts = adapter.texts.lock().unwrap();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0], "hello\nworld");
    }

    #[tokio::test]
    async fn buffer_flushes_early_when_limit_exceeded() {
        let adapter = Arc::new(RecordingAdapter::default());
        let dispatcher = ReplyDispatcher::new(
            peer(),
            adapter.clone(),
            Arc::new(DiagnosticsBus::new()),
            DispatchSettings::default(),
        );
        let big = "x".repeat(2500);
        dispatcher.send_block(TextBlock { text: big }).await;
        assert_eq!(adapter.texts.lock().unwrap().len(), 1);
        dispatcher.finalize().await;
    }

    #[tokio::test]
    async fn transient_failure_is_retried_and_succeeds() {
        let adapter = Arc::new(RecordingAdapter::default());
        adapter.fail_first_n.store(1, Ordering::SeqCst);
        let dispatcher = ReplyDispatcher::new(
            peer(),
            adapter.clone(),
            Arc::new(DiagnosticsBus::new()),
            DispatchSettings::default(),
        );
        dispatcher.send_block(TextBlock { text: "retry me".to_string() }).await;
        dispatcher.finalize().await;
        assert_eq!(adapter.texts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reaction_denied_when_gate_disabled() {
        let adapter = Arc::new(RecordingAdapter::default());
        let dispatcher = ReplyDispatcher::new(
            peer(),
            adapter.clone(),
            Arc::new(DiagnosticsBus::new()),
            DispatchSettings { reactions_enabled: false, ..DispatchSettings::default() },
        );
        dispatcher
            .send_reaction(ReactionDirective {
                target_message_id: "m1".to_string(),
                emoji: "👍".to_string(),
            })
            .await;
        assert_eq!(dispatcher.diagnostics.dropped_count(), 0);
    }

    #[tokio::test]
    async fn only_first_media_item_in_a_run_keeps_its_caption() {
        let adapter = Arc::new(RecordingAdapter::default());
        let dispatcher = ReplyDispatcher::new(
            peer(),
            adapter.clone(),
            Arc::new(DiagnosticsBus::new()),
            DispatchSettings::default(),
        );
        let media = MediaRef {
            local_path: "/nonexistent/does-not-exist.png".to_string(),
            content_type: "image/png".to_string(),
            origin_url: None,
        };
        dispatcher
            .send_media(MediaBlock { media: media.clone(), caption: Some("first".to_string()) })
            .await;
        dispatcher
            .send_media(MediaBlock { media, caption: Some("second".to_string()) })
            .await;
        assert_eq!(dispatcher.media_run_len.load(Ordering::SeqCst), 2);
    }
}
