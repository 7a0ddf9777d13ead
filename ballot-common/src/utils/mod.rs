//! utils.rs
//!
//! Common types shared by the coordinator and the participants.
//!
//! For now this is only the participant identifier, which doubles as the
//! network target of a participant and as the key of every vote map.

pub mod participant_id;
pub use participant_id::{ParseParticipantIdError, ParticipantId};
