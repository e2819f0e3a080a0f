//! Conversation state and turn execution on top of the inference client.

pub mod conversation;
pub mod framing;
pub mod turn;

pub use conversation::Conversation;
pub use framing::frame_event;
pub use turn::{run_buffered_turn, run_streaming_turn, TurnOutcome};
