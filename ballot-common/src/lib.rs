pub mod env;
pub mod utils;

pub use env::events::{EventSink, FanoutSink, NoopSink, ProtocolEvent, SharedSink};
pub use env::vote::Vote;
pub use utils::ParticipantId;
