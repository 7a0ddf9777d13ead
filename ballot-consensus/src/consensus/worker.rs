//! worker.rs
//!
//! Per-connection tasks of the gossip phase. A sender owns the write half of
//! one outbound session, a receiver owns the read half of one inbound
//! session. Neither touches the vote registry: both report to the engine
//! through a single channel and the engine does every merge itself.

use ballot_common::{ParticipantId, Vote};
use ballot_p2p::{Message, P2pError, SessionReader, SessionWriter};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Index of a receiver in the engine's table. Inbound sessions are
/// anonymous until their first VOTE names the peer.
pub type ReceiverSlot = usize;

#[derive(Debug)]
pub enum WorkerEvent {
    /// The sender finished `round`; `votes` is empty when nothing was due.
    Sent {
        peer: ParticipantId,
        round: u32,
        votes: Vec<Vote>,
    },
    SenderFailed {
        peer: ParticipantId,
        round: u32,
        reason: String,
    },
    Received {
        slot: ReceiverSlot,
        peer: Option<ParticipantId>,
        votes: Vec<Vote>,
    },
    /// The receiver stopped for good: the peer closed, the stream failed or a
    /// non-VOTE line arrived.
    ReceiverRetired {
        slot: ReceiverSlot,
        peer: Option<ParticipantId>,
        reason: String,
    },
}

#[derive(Debug)]
pub enum SenderCommand {
    Round { round: u32, votes: Vec<Vote> },
    Close,
}

pub(crate) struct SenderWorker {
    pub peer: ParticipantId,
    pub writer: SessionWriter,
    pub commands: mpsc::UnboundedReceiver<SenderCommand>,
    pub events: mpsc::UnboundedSender<WorkerEvent>,
}

impl SenderWorker {
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                SenderCommand::Round { round, votes } => {
                    if !votes.is_empty() {
                        let message = Message::Vote { votes: votes.clone() };
                        if let Err(e) = self.writer.send(&message).await {
                            warn!(peer = %self.peer, round, "❌ send failed: {}", e);
                            let _ = self.events.send(WorkerEvent::SenderFailed {
                                peer: self.peer,
                                round,
                                reason: e.to_string(),
                            });
                            return;
                        }
                    }
                    let _ = self.events.send(WorkerEvent::Sent { peer: self.peer, round, votes });
                }
                SenderCommand::Close => break,
            }
        }
        self.writer.close().await;
        debug!(peer = %self.peer, "sender closed");
    }
}

pub(crate) struct ReceiverWorker {
    pub slot: ReceiverSlot,
    pub reader: SessionReader,
    pub max_rounds: u32,
    pub round: watch::Receiver<u32>,
    pub events: mpsc::UnboundedSender<WorkerEvent>,
}

impl ReceiverWorker {
    pub async fn run(mut self) {
        let mut peer: Option<ParticipantId> = None;

        let reason = loop {
            if *self.round.borrow() > self.max_rounds {
                break None;
            }

            tokio::select! {
                changed = self.round.changed() => {
                    if changed.is_err() {
                        break None;
                    }
                }
                incoming = self.reader.recv() => match incoming {
                    Ok(Message::Vote { votes }) => {
                        // The first line on an inbound session is the peer's own round-one vote.
                        if peer.is_none() {
                            peer = votes.first().map(|v| v.participant);
                        }
                        let _ = self.events.send(WorkerEvent::Received { slot: self.slot, peer, votes });
                    }
                    Ok(other) => {
                        warn!(slot = self.slot, "🚫 unexpected {} from peer, dropping session", other.kind());
                        break Some(format!("unexpected {}", other.kind()));
                    }
                    Err(P2pError::Closed(_)) => break Some("closed by peer".to_string()),
                    Err(e) => {
                        warn!(slot = self.slot, "❌ receive failed: {}", e);
                        break Some(e.to_string());
                    }
                },
            }
        };

        if let Some(reason) = reason {
            let _ = self.events.send(WorkerEvent::ReceiverRetired { slot: self.slot, peer, reason });
        }
        debug!(slot = self.slot, "receiver done");
    }
}
