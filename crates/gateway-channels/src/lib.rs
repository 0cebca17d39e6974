pub mod channel;
pub mod circuit;
pub mod manager;

pub use channel::{Channel, InboundSink, SendOpts, TypingState};
pub use circuit::{CircuitBreaker, CircuitState, Transition};
pub use manager::ChannelManager;
