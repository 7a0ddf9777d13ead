use ballot_common::ParticipantId;
use thiserror::Error;

/// Identifies one accepted connection on the coordinator.
pub type ConnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterPhase {
    Collecting,
    Broadcasting,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    #[error("too many participants: roster already holds {expected}")]
    TooManyParticipants { expected: usize },

    #[error("participant {0} already joined")]
    DuplicateParticipant(ParticipantId),

    #[error("connection {0} already sent JOIN")]
    AlreadyJoined(ConnId),
}

/// Participants admitted during the join phase, in join order.
///
/// Only the coordinator's accept loop touches it. Once `expected` entries
/// are in, it moves to `Broadcasting` and never admits anyone again.
#[derive(Debug, Clone)]
pub struct Roster {
    expected: usize,
    entries: Vec<(ConnId, ParticipantId)>,
    phase: RosterPhase,
}

impl Roster {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            entries: Vec::with_capacity(expected),
            phase: RosterPhase::Collecting,
        }
    }

    /// Returns `true` when this JOIN completed the roster.
    pub fn admit(&mut self, conn: ConnId, id: ParticipantId) -> Result<bool, RosterError> {
        if self.phase != RosterPhase::Collecting {
            return Err(RosterError::TooManyParticipants { expected: self.expected });
        }
        if self.entries.iter().any(|(c, _)| *c == conn) {
            return Err(RosterError::AlreadyJoined(conn));
        }
        if self.entries.iter().any(|(_, p)| *p == id) {
            return Err(RosterError::DuplicateParticipant(id));
        }

        self.entries.push((conn, id));
        if self.entries.len() == self.expected {
            self.phase = RosterPhase::Broadcasting;
            return Ok(true);
        }
        Ok(false)
    }

    /// Everyone except `id`, in join order.
    pub fn peers_of(&self, id: ParticipantId) -> Vec<ParticipantId> {
        self.entries
            .iter()
            .map(|(_, p)| *p)
            .filter(|p| *p != id)
            .collect()
    }

    pub fn participant(&self, conn: ConnId) -> Option<ParticipantId> {
        self.entries.iter().find(|(c, _)| *c == conn).map(|(_, p)| *p)
    }

    pub fn entries(&self) -> &[(ConnId, ParticipantId)] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        self.entries.iter().map(|(_, p)| *p).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn phase(&self) -> RosterPhase {
        self.phase
    }

    pub fn finish(&mut self) {
        self.phase = RosterPhase::Done;
    }
}
