use std::collections::BTreeMap;

use ballot_common::{ParticipantId, Vote};

/// Votes known to one participant.
///
/// `ledger` holds everything learned so far, `pending` what was learned
/// during the current round and still has to be relayed. Both follow the
/// same rule: the first option recorded for a participant is final.
#[derive(Debug, Default, Clone)]
pub struct VoteRegistry {
    ledger: BTreeMap<ParticipantId, String>,
    pending: BTreeMap<ParticipantId, String>,
}

impl VoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the participant's own vote. It is relayed through the
    /// round-one message rather than through the delta.
    pub fn seed(&mut self, own: &Vote) {
        self.ledger
            .entry(own.participant)
            .or_insert_with(|| own.option.clone());
    }

    /// Returns `true` when the vote was new to the ledger.
    pub fn merge(&mut self, vote: &Vote) -> bool {
        if self.ledger.contains_key(&vote.participant) {
            return false;
        }
        self.ledger.insert(vote.participant, vote.option.clone());
        self.pending
            .entry(vote.participant)
            .or_insert_with(|| vote.option.clone());
        true
    }

    pub fn merge_all<'a>(&mut self, votes: impl IntoIterator<Item = &'a Vote>) -> usize {
        votes.into_iter().filter(|v| self.merge(v)).count()
    }

    /// Closes the round: hands back the delta to relay next and starts an
    /// empty one.
    pub fn rotate(&mut self) -> Vec<Vote> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(participant, option)| Vote { participant, option })
            .collect()
    }

    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.ledger.contains_key(participant)
    }

    pub fn ledger(&self) -> &BTreeMap<ParticipantId, String> {
        &self.ledger
    }

    pub fn pending(&self) -> &BTreeMap<ParticipantId, String> {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.ledger.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty()
    }
}
