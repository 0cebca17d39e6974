pub mod allow_from;
pub mod atomic;
pub mod conversation_ref;
pub mod pairing_store;
pub mod session_store;

pub use allow_from::AllowFromStore;
pub use conversation_ref::ConversationRefStore;
pub use pairing_store::PairingStore;
pub use session_store::SessionStore;
