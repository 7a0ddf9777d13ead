use std::net::SocketAddr;

use ballot_p2p::{MessageKind, P2pError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParticipantError {
    #[error("could not listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transport(#[from] P2pError),

    #[error("expected {expected} from the coordinator, got {actual}")]
    WrongMessage {
        expected: MessageKind,
        actual: MessageKind,
    },

    #[error("coordinator closed the session before sending {0}")]
    CoordinatorClosed(MessageKind),

    #[error("coordinator sent an empty option list")]
    NoOptions,

    #[error("no votes to decide on")]
    EmptyLedger,
}
