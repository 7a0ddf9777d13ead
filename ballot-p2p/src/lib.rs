//! Transport layer: the line protocol, TCP sessions and the audit logger sink.

pub mod error;
pub mod logger;
pub mod message;
pub mod session;

pub use error::P2pError;
pub use logger::UdpLoggerSink;
pub use message::{CodecError, Message, MessageKind};
pub use session::{Session, SessionReader, SessionWriter};
