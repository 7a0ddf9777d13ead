//! Join phase: roster assembly and the DETAILS / VOTE_OPTIONS broadcast.

mod roster;
mod service;

pub use roster::{ConnId, Roster, RosterError, RosterPhase};
pub use service::{Coordinator, CoordinatorError, CoordinatorReport, CoordinatorSettings, ReportedOutcome};
