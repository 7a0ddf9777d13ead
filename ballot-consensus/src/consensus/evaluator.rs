use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use ballot_common::ParticipantId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub winner: String,
    /// Every participant whose vote was counted, ascending.
    pub participants: Vec<ParticipantId>,
    pub tally: BTreeMap<String, usize>,
}

/// Majority rule over a final ledger.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutcomeEvaluator;

impl OutcomeEvaluator {
    /// Highest count wins, ties go to the lexicographically smallest option.
    /// `None` for an empty ledger.
    pub fn decide(ledger: &BTreeMap<ParticipantId, String>) -> Option<Outcome> {
        let mut tally: BTreeMap<String, usize> = BTreeMap::new();
        for option in ledger.values() {
            *tally.entry(option.clone()).or_default() += 1;
        }

        // Ascending walk with a strict comparison keeps the smallest of the tied options.
        let mut best: Option<(&String, usize)> = None;
        for (option, &count) in &tally {
            match best {
                Some((_, top)) if count <= top => {}
                _ => best = Some((option, count)),
            }
        }
        let (winner, count) = best?;
        let winner = winner.clone();

        info!(
            "🗳️ Outcome: {} with {}/{} votes",
            winner,
            count,
            ledger.len()
        );

        Some(Outcome {
            winner,
            participants: ledger.keys().copied().collect(),
            tally,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(entries: &[(u16, &str)]) -> BTreeMap<ParticipantId, String> {
        entries
            .iter()
            .map(|(id, opt)| (ParticipantId(*id), opt.to_string()))
            .collect()
    }

    #[test]
    fn test_strict_majority_wins() {
        let outcome = OutcomeEvaluator::decide(&ledger(&[(1, "B"), (2, "A"), (3, "B")])).unwrap();
        assert_eq!(outcome.winner, "B");
        assert_eq!(outcome.tally["B"], 2);
        assert_eq!(outcome.participants, vec![ParticipantId(1), ParticipantId(2), ParticipantId(3)]);
    }

    #[test]
    fn test_tie_goes_to_smallest_option() {
        let outcome = OutcomeEvaluator::decide(&ledger(&[(1, "C"), (2, "B"), (3, "C"), (4, "B")])).unwrap();
        assert_eq!(outcome.winner, "B");

        let outcome = OutcomeEvaluator::decide(&ledger(&[(1, "Z"), (2, "Y"), (3, "X")])).unwrap();
        assert_eq!(outcome.winner, "X");
    }

    #[test]
    fn test_independent_of_insertion_order() {
        let forward = ledger(&[(1, "A"), (2, "B"), (3, "C"), (4, "B"), (5, "A")]);
        let mut backward = BTreeMap::new();
        for (id, opt) in forward.iter().rev() {
            backward.insert(*id, opt.clone());
        }
        assert_eq!(OutcomeEvaluator::decide(&forward), OutcomeEvaluator::decide(&backward));
        assert_eq!(OutcomeEvaluator::decide(&forward).unwrap().winner, "A");
    }

    #[test]
    fn test_empty_ledger_has_no_outcome() {
        assert!(OutcomeEvaluator::decide(&BTreeMap::new()).is_none());
    }
}
