use std::sync::Arc;

use async_trait::async_trait;
use gateway_core::types::{
    InboundEnvelope, MediaBlock, ReactionDirective, SessionKey, TextBlock, TurnResult,
    TypingDirective,
};
use tokio_util::sync::CancellationToken;

/// The sink an Agent Turn Runner pushes outbound artifacts through (spec
/// §6). Implemented by the Reply Dispatcher; the scheduler only needs the
/// trait object to hand to `AgentTurnRunner::run_turn`.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_block(&self, block: TextBlock);
    async fn send_media(&self, block: MediaBlock);
    async fn send_reaction(&self, directive: ReactionDirective);
    async fn send_typing(&self, directive: TypingDirective);
    async fn finalize(&self);
}

/// External collaborator (spec §1, §6): the agent runtime itself is out of
/// scope for this crate. `run_turn` is invoked at most once per lane at a
/// time (spec §4.5's FIFO guarantee) and must observe `cancel` cooperatively
/// between message-producing steps.
#[async_trait]
pub trait AgentTurnRunner: Send + Sync {
    async fn run_turn(
        &self,
        session_key: &SessionKey,
        envelope: InboundEnvelope,
        reply: Arc<dyn ReplySink>,
        cancel: CancellationToken,
    ) -> TurnResult;
}
