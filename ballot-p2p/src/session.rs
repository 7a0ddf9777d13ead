//! session.rs
//!
//! A TCP connection carrying newline-delimited protocol messages.
//!
//! Sessions are used by both roles: the coordinator holds one per admitted
//! participant, and every participant holds one towards the coordinator plus
//! one per peer in each direction. A session can be split so that a reader
//! task and a writer owner work independently.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::P2pError;
use crate::message::Message;

pub struct Session {
    reader: SessionReader,
    writer: SessionWriter,
}

pub struct SessionReader {
    lines: Lines<BufReader<OwnedReadHalf>>,
    peer: SocketAddr,
}

pub struct SessionWriter {
    inner: OwnedWriteHalf,
    peer: SocketAddr,
}

// Closing must drop unsent bytes instead of waiting: once a round window has
// passed the data is stale.
#[allow(deprecated)]
fn disable_linger(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_linger(Some(Duration::ZERO))
}

impl Session {
    pub async fn connect(addr: SocketAddr) -> Result<Self, P2pError> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream)
    }

    /// Retries with a fixed delay, the remote side may not be listening yet.
    pub async fn connect_with_retry(
        addr: SocketAddr,
        attempts: usize,
        delay: Duration,
    ) -> Result<Self, P2pError> {
        let attempts = attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Self::from_stream(stream),
                Err(e) => {
                    debug!(%addr, attempt, "connect failed: {}", e);
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(P2pError::ConnectFailed {
            addr,
            attempts,
            source: last_err.unwrap_or_else(|| std::io::ErrorKind::NotConnected.into()),
        })
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, P2pError> {
        disable_linger(&stream)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: SessionReader {
                lines: BufReader::new(read_half).lines(),
                peer,
            },
            writer: SessionWriter {
                inner: write_half,
                peer,
            },
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.writer.peer
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), P2pError> {
        self.writer.send(message).await
    }

    pub async fn send_line(&mut self, line: &str) -> Result<(), P2pError> {
        self.writer.send_line(line).await
    }

    pub async fn recv_line(&mut self) -> Result<String, P2pError> {
        self.reader.recv_line().await
    }

    pub async fn recv(&mut self) -> Result<Message, P2pError> {
        self.reader.recv().await
    }

    pub fn into_split(self) -> (SessionReader, SessionWriter) {
        (self.reader, self.writer)
    }

    pub async fn close(self) {
        self.writer.close().await;
    }
}

impl SessionReader {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Next non-blank line without its terminator. End of stream is `Closed`.
    pub async fn recv_line(&mut self) -> Result<String, P2pError> {
        loop {
            match self.lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(line),
                None => return Err(P2pError::Closed(self.peer)),
            }
        }
    }

    pub async fn recv(&mut self) -> Result<Message, P2pError> {
        let line = self.recv_line().await?;
        Ok(Message::decode(&line)?)
    }
}

impl SessionWriter {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), P2pError> {
        self.send_line(&message.encode()).await
    }

    pub async fn send_line(&mut self, line: &str) -> Result<(), P2pError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.inner.write_all(&buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Best effort, the peer may already be gone.
    pub async fn close(mut self) {
        if let Err(e) = self.inner.shutdown().await {
            debug!(peer = %self.peer, "shutdown failed: {}", e);
        }
    }
}
