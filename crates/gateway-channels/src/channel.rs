use async_trait::async_trait;
use gateway_core::types::{InboundEnvelope, MediaRef, Peer};
use gateway_core::GatewayError;

/// `composing`/`idle` as named in spec §6's `SendTyping` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    Composing,
    Idle,
}

/// Chunking hints and reply-threading references passed to every outbound
/// send. The dispatcher (§4.7) fills these in; adapters only read them.
#[derive(Debug, Clone, Default)]
pub struct SendOpts {
    pub reply_to_message_id: Option<String>,
    pub is_final_chunk: bool,
}

/// The sink an adapter pushes normalized envelopes through. `emit` is
/// non-blocking from the adapter's perspective (spec §4.1) — backpressure,
/// if any, is handled by the bounded channel on the receiving end, not by
/// the adapter waiting on the gateway.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn emit(&self, envelope: InboundEnvelope);
}

/// Uniform surface every channel transport presents to the gateway core
/// (spec §4.1). Transport establishment/maintenance, payload translation,
/// and outbound rendering with retry are all the adapter's job; envelope
/// dedup and policy gating are not (§4.3).
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin ingestion, pushing normalized envelopes to `sink`.
    async fn start(&self, sink: std::sync::Arc<dyn InboundSink>) -> Result<(), GatewayError>;

    /// Drain in-flight outbound sends within the graceful timeout, then
    /// close transport.
    async fn stop(&self) -> Result<(), GatewayError>;

    async fn send_text(&self, peer: &Peer, text: &str, opts: &SendOpts) -> Result<(), GatewayError>;

    async fn send_media(
        &self,
        peer: &Peer,
        media: &MediaRef,
        caption: Option<&str>,
        opts: &SendOpts,
    ) -> Result<(), GatewayError>;

    /// Best-effort — gating on whether reactions are enabled for this
    /// channel is enforced by the dispatcher (§4.5), not here.
    async fn send_reaction(
        &self,
        peer: &Peer,
        target_message_id: &str,
        emoji: &str,
    ) -> Result<(), GatewayError>;

    async fn send_typing(&self, peer: &Peer, state: TypingState) -> Result<(), GatewayError>;
}
