//! Gossip phase of a participant.
//!
//! Every participant floods what it knows about votes to each of its peers
//! for a fixed number of rounds, then decides locally. The registry keeps the
//! first option seen per participant, so merges commute and the order in
//! which peers report does not matter.

mod engine;
pub mod evaluator;
mod registry;
mod worker;

pub use engine::{GossipSummary, RoundConfig, RoundEngine};
pub use evaluator::{Outcome, OutcomeEvaluator};
pub use registry::VoteRegistry;
pub use worker::{ReceiverSlot, SenderCommand, WorkerEvent};
