use std::net::SocketAddr;

use thiserror::Error;

use crate::message::CodecError;

#[derive(Debug, Error)]
pub enum P2pError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Codec(#[from] CodecError),

    #[error("could not reach {addr} after {attempts} attempts: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        attempts: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("session closed by {0}")]
    Closed(SocketAddr),
}
