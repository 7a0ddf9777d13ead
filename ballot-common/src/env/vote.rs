use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::ParticipantId;

/// One (participant, option) pair as carried by `VOTE` messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vote {
    pub participant: ParticipantId,
    pub option: String,
}

impl Vote {
    pub fn new(participant: ParticipantId, option: impl Into<String>) -> Self {
        Self {
            participant,
            option: option.into(),
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.participant, self.option)
    }
}
