//! bootstrap.rs
//!
//! Registration with the coordinator. A participant cannot do anything
//! useful without its peer list and the option list, so every failure here
//! ends the process.

use std::net::SocketAddr;

use rand::seq::SliceRandom;
use tracing::info;

use ballot_common::{ParticipantId, ProtocolEvent, SharedSink, Vote};
use ballot_p2p::{Message, MessageKind, P2pError, Session};

use super::error::ParticipantError;

/// What the coordinator handed out during the join phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub peers: Vec<ParticipantId>,
    pub options: Vec<String>,
}

pub(crate) async fn join(
    session: &mut Session,
    id: ParticipantId,
    coordinator: SocketAddr,
    sink: &SharedSink,
) -> Result<(), ParticipantError> {
    session.send(&Message::Join { id }).await?;
    sink.notify(ProtocolEvent::JoinSent { coordinator: coordinator.to_string() });
    info!("🤝 Joined coordinator {} as {}", coordinator, id);
    Ok(())
}

async fn expect(session: &mut Session, expected: MessageKind) -> Result<Message, ParticipantError> {
    let message = match session.recv().await {
        Ok(message) => message,
        Err(P2pError::Closed(_)) => return Err(ParticipantError::CoordinatorClosed(expected)),
        Err(e) => return Err(e.into()),
    };
    if message.kind() != expected {
        return Err(ParticipantError::WrongMessage { expected, actual: message.kind() });
    }
    Ok(message)
}

/// Waits for DETAILS and then VOTE_OPTIONS, in that order.
pub(crate) async fn receive_assignment(
    session: &mut Session,
    own: ParticipantId,
    sink: &SharedSink,
) -> Result<Assignment, ParticipantError> {
    let peers = match expect(session, MessageKind::Details).await? {
        Message::Details { peers } => peers,
        other => {
            return Err(ParticipantError::WrongMessage {
                expected: MessageKind::Details,
                actual: other.kind(),
            })
        }
    };
    sink.notify(ProtocolEvent::DetailsReceived { peers: peers.clone() });
    info!("📇 Peers: {:?}", peers);

    let options = match expect(session, MessageKind::VoteOptions).await? {
        Message::VoteOptions { options } => options,
        other => {
            return Err(ParticipantError::WrongMessage {
                expected: MessageKind::VoteOptions,
                actual: other.kind(),
            })
        }
    };
    sink.notify(ProtocolEvent::VoteOptionsReceived { options: options.clone() });
    info!("🗒️ Options: {:?}", options);

    if options.is_empty() {
        return Err(ParticipantError::NoOptions);
    }

    // The coordinator never lists the recipient, but a stray self entry would
    // make us wait on a session to ourselves.
    let peers = peers.into_iter().filter(|p| *p != own).collect();
    Ok(Assignment { peers, options })
}

/// Uniform pick over the option list.
pub(crate) fn choose_vote(own: ParticipantId, options: &[String]) -> Result<Vote, ParticipantError> {
    let option = options
        .choose(&mut rand::thread_rng())
        .ok_or(ParticipantError::NoOptions)?;
    info!("🗳️ Selected vote: {}", option);
    Ok(Vote::new(own, option.clone()))
}
