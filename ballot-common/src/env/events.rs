//! events.rs
//!
//! Protocol milestones reported to the audit logger.
//!
//! The sink is fire-and-forget: nothing in the coordinator or the
//! participants looks at what a sink does with an event, so a slow or
//! missing logger can never change the outcome of a run.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{env::vote::Vote, utils::ParticipantId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolEvent {
    JoinSent { coordinator: String },
    DetailsReceived { peers: Vec<ParticipantId> },
    VoteOptionsReceived { options: Vec<String> },
    BeginRound { round: u32 },
    EndRound { round: u32 },
    /// A round was closed by its deadline while some workers had not reported.
    PeerStalled { round: u32, pending: Vec<String> },
    VotesSent { peer: ParticipantId, votes: Vec<Vote> },
    VotesReceived { peer: ParticipantId, votes: Vec<Vote> },
    ConnectionEstablished { peer: String },
    OutcomeDecided { winner: String, participants: Vec<ParticipantId> },
    OutcomeNotified { winner: String, participants: Vec<ParticipantId> },
    ParticipantRejected { reason: String },
}

impl ProtocolEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolEvent::JoinSent { .. } => "JOIN_SENT",
            ProtocolEvent::DetailsReceived { .. } => "DETAILS_RECEIVED",
            ProtocolEvent::VoteOptionsReceived { .. } => "VOTE_OPTIONS_RECEIVED",
            ProtocolEvent::BeginRound { .. } => "BEGIN_ROUND",
            ProtocolEvent::EndRound { .. } => "END_ROUND",
            ProtocolEvent::PeerStalled { .. } => "PEER_STALLED",
            ProtocolEvent::VotesSent { .. } => "VOTES_SENT",
            ProtocolEvent::VotesReceived { .. } => "VOTES_RECEIVED",
            ProtocolEvent::ConnectionEstablished { .. } => "CONNECTION_ESTABLISHED",
            ProtocolEvent::OutcomeDecided { .. } => "OUTCOME_DECIDED",
            ProtocolEvent::OutcomeNotified { .. } => "OUTCOME_NOTIFIED",
            ProtocolEvent::ParticipantRejected { .. } => "PARTICIPANT_REJECTED",
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",")
}

impl fmt::Display for ProtocolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EVENT:{}", self.kind())?;
        match self {
            ProtocolEvent::JoinSent { coordinator } => write!(f, " coordinator={}", coordinator),
            ProtocolEvent::DetailsReceived { peers } => write!(f, " peers=[{}]", join(peers)),
            ProtocolEvent::VoteOptionsReceived { options } => {
                write!(f, " options=[{}]", join(options))
            }
            ProtocolEvent::BeginRound { round } | ProtocolEvent::EndRound { round } => {
                write!(f, " round={}", round)
            }
            ProtocolEvent::PeerStalled { round, pending } => {
                write!(f, " round={} pending=[{}]", round, join(pending))
            }
            ProtocolEvent::VotesSent { peer, votes } | ProtocolEvent::VotesReceived { peer, votes } => {
                let votes: Vec<String> = votes.iter().map(|v| format!("{}={}", v.participant, v.option)).collect();
                write!(f, " peer={} votes=[{}]", peer, votes.join(","))
            }
            ProtocolEvent::ConnectionEstablished { peer } => write!(f, " peer={}", peer),
            ProtocolEvent::OutcomeDecided { winner, participants }
            | ProtocolEvent::OutcomeNotified { winner, participants } => {
                write!(f, " winner={} participants=[{}]", winner, join(participants))
            }
            ProtocolEvent::ParticipantRejected { reason } => write!(f, " reason={:?}", reason),
        }
    }
}

/// Receives protocol milestones. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: ProtocolEvent);
}

pub type SharedSink = Arc<dyn EventSink>;

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn notify(&self, _event: ProtocolEvent) {}
}

/// Forwards every event to each inner sink, in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<SharedSink>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: SharedSink) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn notify(&self, event: ProtocolEvent) {
        for sink in &self.sinks {
            sink.notify(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ProtocolEvent>>);

    impl EventSink for Collect {
        fn notify(&self, event: ProtocolEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_display_is_single_audit_line() {
        let event = ProtocolEvent::VotesSent {
            peer: ParticipantId(9002),
            votes: vec![Vote::new(ParticipantId(9001), "A")],
        };
        assert_eq!(event.to_string(), "EVENT:VOTES_SENT peer=9002 votes=[9001=A]");

        let event = ProtocolEvent::OutcomeDecided {
            winner: "B".into(),
            participants: vec![ParticipantId(1), ParticipantId(2)],
        };
        assert_eq!(event.to_string(), "EVENT:OUTCOME_DECIDED winner=B participants=[1,2]");
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(Collect::default());
        let b = Arc::new(Collect::default());
        let fanout = FanoutSink::new().with(a.clone()).with(b.clone());
        assert_eq!(fanout.len(), 2);

        fanout.notify(ProtocolEvent::BeginRound { round: 1 });
        fanout.notify(ProtocolEvent::EndRound { round: 1 });

        assert_eq!(a.0.lock().unwrap().len(), 2);
        assert_eq!(b.0.lock().unwrap()[1], ProtocolEvent::EndRound { round: 1 });
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_string(&ProtocolEvent::BeginRound { round: 3 }).unwrap();
        assert_eq!(json, r#"{"kind":"begin_round","round":3}"#);
    }
}
