pub mod lane;
pub mod table;
pub mod turn;

pub use lane::{ConversationLane, EnqueueOutcome};
pub use table::LaneTable;
pub use turn::{AgentTurnRunner, ReplySink};
