//! Participant runtime.
//!
//! ```text
//! bind listener -> connect coordinator (retry) -> JOIN
//!   -> DETAILS -> VOTE_OPTIONS -> random vote
//!   -> mesh with peers -> gossip rounds -> decide -> OUTCOME -> close
//! ```
//!
//! The listener is bound before JOIN is sent, so peers that learn about us
//! from the coordinator can always reach us. The bound port is the
//! participant id.

mod bootstrap;
mod error;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ballot_common::{ParticipantId, ProtocolEvent, SharedSink, Vote};
use ballot_p2p::{Message, Session, SessionReader};

use crate::consensus::{Outcome, OutcomeEvaluator, RoundConfig, RoundEngine};

pub use bootstrap::Assignment;
pub use error::ParticipantError;

#[derive(Debug, Clone)]
pub struct ParticipantSettings {
    pub coordinator: SocketAddr,
    /// Port 0 picks a free port.
    pub listen: SocketAddr,
    pub timeout: Duration,
    /// Defaults to the number of peers.
    pub max_rounds: Option<u32>,
    pub connect_attempts: usize,
    pub retry_delay: Duration,
}

impl ParticipantSettings {
    pub fn new(coordinator: SocketAddr, listen: SocketAddr, timeout: Duration) -> Self {
        Self {
            coordinator,
            listen,
            timeout,
            max_rounds: None,
            connect_attempts: 50,
            retry_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParticipantReport {
    pub id: ParticipantId,
    pub vote: Vote,
    pub peers: Vec<ParticipantId>,
    pub outcome: Outcome,
    pub rounds: u32,
    pub stalled_rounds: Vec<u32>,
    pub quiet_rounds: Vec<u32>,
}

pub struct Participant {
    id: ParticipantId,
    listener: TcpListener,
    settings: ParticipantSettings,
    sink: SharedSink,
}

impl Participant {
    pub async fn bind(settings: ParticipantSettings, sink: SharedSink) -> Result<Self, ParticipantError> {
        let bind_err = |source| ParticipantError::Bind { addr: settings.listen, source };
        let listener = TcpListener::bind(settings.listen).await.map_err(bind_err)?;
        let local = listener.local_addr().map_err(bind_err)?;

        Ok(Self {
            id: ParticipantId(local.port()),
            listener,
            settings,
            sink,
        })
    }

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Replaces the event sink. The id is only known once the listener is
    /// bound, so sinks that are tagged with it are attached here.
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Peers listen on the same host as we do.
    fn peer_host(&self) -> IpAddr {
        let ip = self.settings.listen.ip();
        if ip.is_unspecified() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            ip
        }
    }

    pub async fn run(self) -> Result<ParticipantReport, ParticipantError> {
        let host = self.peer_host();
        let Participant { id, listener, settings, sink } = self;

        let mut coordinator = Session::connect_with_retry(
            settings.coordinator,
            settings.connect_attempts,
            settings.retry_delay,
        )
        .await?;

        bootstrap::join(&mut coordinator, id, settings.coordinator, &sink).await?;
        let Assignment { peers, options } = bootstrap::receive_assignment(&mut coordinator, id, &sink).await?;
        let vote = bootstrap::choose_vote(id, &options)?;

        let (inbound_tx, inbound_rx) = mpsc::channel(peers.len().max(1));
        let acceptor = tokio::spawn(accept_peers(listener, peers.len(), inbound_tx));

        let max_rounds = settings.max_rounds.unwrap_or(peers.len() as u32);
        let config = RoundConfig { max_rounds, timeout: settings.timeout };
        let mut engine = RoundEngine::new(vote.clone(), peers.len(), config, sink.clone());

        let connects = peers.iter().map(|peer| {
            let addr = peer.socket_addr(host);
            let (attempts, delay) = (settings.connect_attempts, settings.retry_delay);
            async move { (*peer, Session::connect_with_retry(addr, attempts, delay).await) }
        });
        for (peer, connected) in join_all(connects).await {
            match connected {
                Ok(session) => {
                    sink.notify(ProtocolEvent::ConnectionEstablished { peer: peer.to_string() });
                    debug!(%peer, "outbound session ready");
                    let (_, writer) = session.into_split();
                    engine.add_sender(peer, writer);
                }
                Err(e) => warn!(%peer, "❌ peer unreachable, continuing without it: {}", e),
            }
        }

        let summary = engine.run(inbound_rx).await;
        acceptor.abort();

        info!("📊 Votes collected: {:?}", summary.registry.ledger());
        let outcome = OutcomeEvaluator::decide(summary.registry.ledger()).ok_or(ParticipantError::EmptyLedger)?;
        sink.notify(ProtocolEvent::OutcomeDecided {
            winner: outcome.winner.clone(),
            participants: outcome.participants.clone(),
        });

        let report = Message::Outcome {
            winner: outcome.winner.clone(),
            participants: outcome.participants.clone(),
        };
        match coordinator.send(&report).await {
            Ok(()) => {
                sink.notify(ProtocolEvent::OutcomeNotified {
                    winner: outcome.winner.clone(),
                    participants: outcome.participants.clone(),
                });
                info!("📤 Outcome sent: {}", report);
            }
            Err(e) => warn!("could not report outcome to coordinator: {}", e),
        }
        coordinator.close().await;

        Ok(ParticipantReport {
            id,
            vote,
            peers,
            outcome,
            rounds: summary.rounds,
            stalled_rounds: summary.stalled_rounds,
            quiet_rounds: summary.quiet_rounds,
        })
    }
}

/// Accepts one inbound session per peer. Peers are anonymous at this point,
/// the engine learns who is who from their first VOTE.
async fn accept_peers(listener: TcpListener, expected: usize, inbound: mpsc::Sender<SessionReader>) {
    let mut accepted = 0;
    while accepted < expected {
        let stream = match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "inbound peer connection");
                stream
            }
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        match Session::from_stream(stream) {
            Ok(session) => {
                let (reader, _) = session.into_split();
                if inbound.send(reader).await.is_err() {
                    return;
                }
                accepted += 1;
            }
            Err(e) => warn!("could not set up inbound session: {}", e),
        }
    }
}
