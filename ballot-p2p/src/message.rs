//! message.rs
//!
//! Line-oriented wire protocol shared by the coordinator and the participants.
//!
//! Every message is one line of space-separated ASCII tokens and the first
//! token names the message kind:
//!
//! ```text
//! JOIN <id>
//! DETAILS <id> <id> ...
//! VOTE_OPTIONS <opt> <opt> ...
//! VOTE <id> <opt> [<id> <opt> ...]
//! OUTCOME <winner> <id> <id> ...
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use ballot_common::{ParticipantId, Vote};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Join,
    Details,
    VoteOptions,
    Vote,
    Outcome,
}

impl MessageKind {
    pub fn token(&self) -> &'static str {
        match self {
            MessageKind::Join => "JOIN",
            MessageKind::Details => "DETAILS",
            MessageKind::VoteOptions => "VOTE_OPTIONS",
            MessageKind::Vote => "VOTE",
            MessageKind::Outcome => "OUTCOME",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "JOIN" => Some(MessageKind::Join),
            "DETAILS" => Some(MessageKind::Details),
            "VOTE_OPTIONS" => Some(MessageKind::VoteOptions),
            "VOTE" => Some(MessageKind::Vote),
            "OUTCOME" => Some(MessageKind::Outcome),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Join { id: ParticipantId },
    Details { peers: Vec<ParticipantId> },
    VoteOptions { options: Vec<String> },
    /// A single vote in round 1, a relay batch afterwards.
    Vote { votes: Vec<Vote> },
    Outcome { winner: String, participants: Vec<ParticipantId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("empty message")]
    Empty,

    #[error("unknown message kind {0:?}")]
    UnknownKind(String),

    #[error("{kind} is missing its {field}")]
    MissingField { kind: MessageKind, field: &'static str },

    #[error("{kind} carries an invalid participant id {token:?}")]
    InvalidId { kind: MessageKind, token: String },

    #[error("VOTE payload has a participant without an option")]
    UnpairedVote,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Join { .. } => MessageKind::Join,
            Message::Details { .. } => MessageKind::Details,
            Message::VoteOptions { .. } => MessageKind::VoteOptions,
            Message::Vote { .. } => MessageKind::Vote,
            Message::Outcome { .. } => MessageKind::Outcome,
        }
    }

    /// Single line, no trailing newline.
    pub fn encode(&self) -> String {
        let mut line = String::from(self.kind().token());
        let mut push = |token: &dyn fmt::Display| {
            line.push(' ');
            line.push_str(&token.to_string());
        };
        match self {
            Message::Join { id } => push(id),
            Message::Details { peers } => peers.iter().for_each(|p| push(p)),
            Message::VoteOptions { options } => options.iter().for_each(|o| push(o)),
            Message::Vote { votes } => votes.iter().for_each(|v| {
                push(&v.participant);
                push(&v.option);
            }),
            Message::Outcome { winner, participants } => {
                push(winner);
                participants.iter().for_each(|p| push(p));
            }
        }
        line
    }

    pub fn decode(line: &str) -> Result<Self, CodecError> {
        let mut tokens = line.split_whitespace();
        let head = tokens.next().ok_or(CodecError::Empty)?;
        let kind = MessageKind::from_token(head).ok_or_else(|| CodecError::UnknownKind(head.to_string()))?;
        let rest: Vec<&str> = tokens.collect();

        let parse_id = |token: &str| {
            token.parse::<ParticipantId>().map_err(|_| CodecError::InvalidId {
                kind,
                token: token.to_string(),
            })
        };

        match kind {
            MessageKind::Join => match rest.as_slice() {
                [id, ..] => Ok(Message::Join { id: parse_id(*id)? }),
                [] => Err(CodecError::MissingField { kind, field: "participant id" }),
            },
            MessageKind::Details => {
                let peers = rest.iter().map(|&t| parse_id(t)).collect::<Result<Vec<_>, _>>()?;
                Ok(Message::Details { peers })
            }
            MessageKind::VoteOptions => Ok(Message::VoteOptions {
                options: rest.iter().map(|t| t.to_string()).collect(),
            }),
            MessageKind::Vote => {
                if rest.is_empty() {
                    return Err(CodecError::MissingField { kind, field: "votes" });
                }
                if rest.len() % 2 != 0 {
                    return Err(CodecError::UnpairedVote);
                }
                let votes = rest
                    .chunks(2)
                    .map(|pair| Ok(Vote::new(parse_id(pair[0])?, pair[1])))
                    .collect::<Result<Vec<_>, CodecError>>()?;
                Ok(Message::Vote { votes })
            }
            MessageKind::Outcome => match rest.split_first() {
                Some((winner, ids)) => Ok(Message::Outcome {
                    winner: winner.to_string(),
                    participants: ids.iter().map(|&t| parse_id(t)).collect::<Result<Vec<_>, _>>()?,
                }),
                None => Err(CodecError::MissingField { kind, field: "winner" }),
            },
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Message {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Message::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(port: u16) -> ParticipantId {
        ParticipantId(port)
    }

    #[test]
    fn test_encode_matches_wire_format() {
        assert_eq!(Message::Join { id: id(9001) }.encode(), "JOIN 9001");
        assert_eq!(
            Message::Details { peers: vec![id(9002), id(9003)] }.encode(),
            "DETAILS 9002 9003"
        );
        assert_eq!(
            Message::VoteOptions { options: vec!["A".into(), "B".into(), "C".into()] }.encode(),
            "VOTE_OPTIONS A B C"
        );
        assert_eq!(
            Message::Vote { votes: vec![Vote::new(id(9001), "A"), Vote::new(id(9003), "C")] }.encode(),
            "VOTE 9001 A 9003 C"
        );
        assert_eq!(
            Message::Outcome { winner: "A".into(), participants: vec![id(9001), id(9002), id(9003)] }.encode(),
            "OUTCOME A 9001 9002 9003"
        );
    }

    #[test]
    fn test_decode_round_one_and_relay_shapes() {
        let single = Message::decode("VOTE 9001 A").unwrap();
        assert_eq!(single, Message::Vote { votes: vec![Vote::new(id(9001), "A")] });

        let relay = Message::decode("VOTE 9002 B 9003 A").unwrap();
        assert_eq!(
            relay,
            Message::Vote { votes: vec![Vote::new(id(9002), "B"), Vote::new(id(9003), "A")] }
        );
    }

    #[test]
    fn test_decode_tolerates_trailing_space() {
        // Older peers terminate every token with a space.
        let msg = Message::decode("DETAILS 9002 9003 ").unwrap();
        assert_eq!(msg, Message::Details { peers: vec![id(9002), id(9003)] });

        let msg = Message::decode("VOTE_OPTIONS A B \r").unwrap();
        assert_eq!(msg, Message::VoteOptions { options: vec!["A".into(), "B".into()] });
    }

    #[test]
    fn test_empty_details_is_valid() {
        assert_eq!(Message::decode("DETAILS").unwrap(), Message::Details { peers: vec![] });
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(Message::decode("   "), Err(CodecError::Empty));
        assert_eq!(Message::decode("HELLO 1"), Err(CodecError::UnknownKind("HELLO".into())));
        assert!(matches!(
            Message::decode("JOIN"),
            Err(CodecError::MissingField { kind: MessageKind::Join, .. })
        ));
        assert!(matches!(
            Message::decode("JOIN abc"),
            Err(CodecError::InvalidId { kind: MessageKind::Join, .. })
        ));
        assert_eq!(Message::decode("VOTE 9001 A 9002"), Err(CodecError::UnpairedVote));
        assert!(matches!(Message::decode("VOTE"), Err(CodecError::MissingField { .. })));
        assert!(matches!(Message::decode("OUTCOME"), Err(CodecError::MissingField { .. })));
    }

    #[test]
    fn test_kind_is_case_sensitive() {
        assert!(matches!(Message::decode("join 9001"), Err(CodecError::UnknownKind(_))));
    }
}
