pub mod consensus;
pub mod coordinator;
pub mod participant;

pub use consensus::{Outcome, OutcomeEvaluator, RoundConfig, RoundEngine, VoteRegistry};
pub use coordinator::{Coordinator, CoordinatorError, CoordinatorReport, CoordinatorSettings};
pub use participant::{Participant, ParticipantError, ParticipantReport, ParticipantSettings};
