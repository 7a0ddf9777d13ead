//! service.rs
//!
//! The coordinator process: rendezvous for the participants.
//!
//! A single loop owns the roster and the write half of every session. Each
//! accepted connection gets a reader task that decodes lines and forwards
//! them to the loop, so nothing else mutates coordinator state.
//!
//! ```text
//! COLLECTING   accept, wait for JOIN on each session
//! BROADCASTING DETAILS to each participant, then VOTE_OPTIONS to all,
//!              then collect OUTCOME reports
//! DONE         every admitted session reported or closed
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use ballot_common::{ParticipantId, ProtocolEvent, SharedSink};
use ballot_p2p::{Message, P2pError, Session, SessionReader, SessionWriter};

use super::roster::{ConnId, Roster, RosterError, RosterPhase};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("could not listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid coordinator settings: {0}")]
    InvalidSettings(String),
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub listen: SocketAddr,
    pub participants: usize,
    /// How long a fresh connection may stay silent before its JOIN.
    pub timeout: Duration,
    pub options: Vec<String>,
    /// Stop waiting for OUTCOME reports this long after the broadcast.
    pub outcome_window: Option<Duration>,
}

/// An OUTCOME line as reported by one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedOutcome {
    pub winner: String,
    pub participants: Vec<ParticipantId>,
}

#[derive(Debug, Clone, Default)]
pub struct CoordinatorReport {
    /// Admitted participants in join order.
    pub roster: Vec<ParticipantId>,
    pub outcomes: BTreeMap<ParticipantId, ReportedOutcome>,
    pub rejected: usize,
}

impl CoordinatorReport {
    /// The common winner when at least one participant reported and all
    /// reports name the same option.
    pub fn agreed_winner(&self) -> Option<&str> {
        let mut winners = self.outcomes.values().map(|o| o.winner.as_str());
        let first = winners.next()?;
        winners.all(|w| w == first).then_some(first)
    }
}

#[derive(Debug)]
enum Inbound {
    Message(ConnId, Message),
    Invalid(ConnId, String),
    Silent(ConnId),
    Closed(ConnId),
}

struct Connection {
    addr: SocketAddr,
    writer: SessionWriter,
    reader: JoinHandle<()>,
    joined: bool,
}

pub struct Coordinator {
    listener: TcpListener,
    settings: CoordinatorSettings,
    sink: SharedSink,
}

impl Coordinator {
    pub async fn bind(settings: CoordinatorSettings, sink: SharedSink) -> Result<Self, CoordinatorError> {
        if settings.participants == 0 {
            return Err(CoordinatorError::InvalidSettings("participant count must be positive".into()));
        }
        if settings.options.is_empty() {
            return Err(CoordinatorError::InvalidSettings("option list is empty".into()));
        }

        let listener = TcpListener::bind(settings.listen)
            .await
            .map_err(|source| CoordinatorError::Bind { addr: settings.listen, source })?;

        Ok(Self { listener, settings, sink })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> Result<CoordinatorReport, CoordinatorError> {
        let Coordinator { listener, settings, sink } = self;
        let (inbox_tx, mut inbox) = mpsc::unbounded_channel::<Inbound>();

        let mut roster = Roster::new(settings.participants);
        let mut connections: HashMap<ConnId, Connection> = HashMap::new();
        let mut report = CoordinatorReport::default();
        let mut next_conn: ConnId = 0;
        let mut outcome_deadline: Option<Instant> = None;

        info!(
            "📡 Coordinator waiting for {} participants, options {:?}",
            settings.participants, settings.options
        );

        loop {
            if roster.phase() == RosterPhase::Broadcasting && all_reported(&roster, &connections, &report) {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => match Session::from_stream(stream) {
                        Ok(session) => {
                            next_conn += 1;
                            let conn = next_conn;
                            let (reader, writer) = session.into_split();
                            let task = tokio::spawn(read_loop(conn, reader, settings.timeout, inbox_tx.clone()));
                            connections.insert(conn, Connection { addr, writer, reader: task, joined: false });
                            debug!(conn, %addr, "connection accepted");
                        }
                        Err(e) => warn!(%addr, "could not set up session: {}", e),
                    },
                    Err(e) => warn!("accept failed: {}", e),
                },

                Some(inbound) = inbox.recv() => match inbound {
                    Inbound::Message(conn, Message::Join { id }) => {
                        let Some(connection) = connections.get_mut(&conn) else { continue };
                        if connection.joined {
                            debug!(conn, "repeated JOIN ignored");
                            continue;
                        }
                        match roster.admit(conn, id) {
                            Ok(full) => {
                                connection.joined = true;
                                info!("👋 Participant {} joined ({}/{})", id, roster.len(), roster.expected());
                                if full {
                                    broadcast(&roster, &settings.options, &mut connections).await;
                                    outcome_deadline = settings.outcome_window.map(|w| Instant::now() + w);
                                }
                            }
                            Err(RosterError::AlreadyJoined(_)) => debug!(conn, "repeated JOIN ignored"),
                            Err(e) => {
                                warn!(conn, "🚫 Rejecting {}: {}", id, e);
                                sink.notify(ProtocolEvent::ParticipantRejected { reason: e.to_string() });
                                report.rejected += 1;
                                abandon(&mut connections, conn).await;
                            }
                        }
                    }
                    Inbound::Message(conn, Message::Outcome { winner, participants }) => {
                        match roster.participant(conn) {
                            Some(id) => {
                                info!("📥 OUTCOME from {}: {} {:?}", id, winner, participants);
                                report.outcomes.insert(id, ReportedOutcome { winner, participants });
                            }
                            None => {
                                warn!(conn, "OUTCOME before JOIN, abandoning session");
                                abandon(&mut connections, conn).await;
                            }
                        }
                    }
                    Inbound::Message(conn, other) => {
                        let joined = connections.get(&conn).map(|c| c.joined).unwrap_or(false);
                        if joined {
                            debug!(conn, "ignoring {} from participant", other.kind());
                        } else {
                            warn!(conn, "🚫 protocol violation: first message was {}", other.kind());
                            abandon(&mut connections, conn).await;
                        }
                    }
                    Inbound::Invalid(conn, reason) => {
                        let joined = connections.get(&conn).map(|c| c.joined).unwrap_or(false);
                        warn!(conn, "malformed line: {}", reason);
                        if !joined {
                            abandon(&mut connections, conn).await;
                        }
                    }
                    Inbound::Silent(conn) => {
                        warn!(conn, "⏱️ no JOIN within {:?}, abandoning session", settings.timeout);
                        abandon(&mut connections, conn).await;
                    }
                    Inbound::Closed(conn) => {
                        if let Some(connection) = connections.remove(&conn) {
                            debug!(conn, addr = %connection.addr, "session closed");
                        }
                    }
                },

                _ = sleep_until(outcome_deadline.unwrap_or_else(Instant::now)), if outcome_deadline.is_some() => {
                    warn!("⏱️ outcome window elapsed with {}/{} reports", report.outcomes.len(), roster.len());
                    break;
                }
            }
        }

        roster.finish();
        report.roster = roster.ids();

        match report.agreed_winner() {
            Some(winner) if report.outcomes.len() == roster.len() => {
                info!("✅ All {} participants agree on {}", roster.len(), winner)
            }
            Some(winner) => info!(
                "✅ {} of {} participants reported, all agree on {}",
                report.outcomes.len(),
                roster.len(),
                winner
            ),
            None if report.outcomes.is_empty() => warn!("no participant reported an outcome"),
            None => warn!("⚠️ Participants disagree: {:?}", report.outcomes),
        }

        for (_, connection) in connections.drain() {
            connection.reader.abort();
            connection.writer.close().await;
        }

        Ok(report)
    }
}

/// Done once every admitted participant either reported or hung up.
fn all_reported(roster: &Roster, connections: &HashMap<ConnId, Connection>, report: &CoordinatorReport) -> bool {
    roster.entries().iter().all(|(conn, id)| {
        report.outcomes.contains_key(id) || !connections.contains_key(conn)
    })
}

/// DETAILS to each participant with its own peer list, then VOTE_OPTIONS to
/// all. A failed session is reported and skipped.
async fn broadcast(roster: &Roster, options: &[String], connections: &mut HashMap<ConnId, Connection>) {
    for (conn, id) in roster.entries() {
        let Some(connection) = connections.get_mut(conn) else {
            warn!("participant {} left before DETAILS", id);
            continue;
        };
        let details = Message::Details { peers: roster.peers_of(*id) };
        if let Err(e) = connection.writer.send(&details).await {
            warn!("❌ DETAILS to {} failed: {}", id, e);
        }
    }

    let vote_options = Message::VoteOptions { options: options.to_vec() };
    for (conn, id) in roster.entries() {
        let Some(connection) = connections.get_mut(conn) else { continue };
        if let Err(e) = connection.writer.send(&vote_options).await {
            warn!("❌ VOTE_OPTIONS to {} failed: {}", id, e);
        }
    }
    info!("📣 Broadcast sent to {} participants", roster.len());
}

async fn abandon(connections: &mut HashMap<ConnId, Connection>, conn: ConnId) {
    if let Some(connection) = connections.remove(&conn) {
        connection.reader.abort();
        connection.writer.close().await;
    }
}

async fn read_loop(conn: ConnId, mut reader: SessionReader, join_timeout: Duration, inbox: mpsc::UnboundedSender<Inbound>) {
    let first = match tokio::time::timeout(join_timeout, reader.recv()).await {
        Ok(result) => result,
        Err(_) => {
            let _ = inbox.send(Inbound::Silent(conn));
            return;
        }
    };

    let mut next = first;
    loop {
        let forwarded = match next {
            Ok(message) => inbox.send(Inbound::Message(conn, message)),
            Err(P2pError::Codec(e)) => inbox.send(Inbound::Invalid(conn, e.to_string())),
            Err(e) => {
                if !matches!(e, P2pError::Closed(_)) {
                    debug!(conn, "read failed: {}", e);
                }
                let _ = inbox.send(Inbound::Closed(conn));
                return;
            }
        };
        if forwarded.is_err() {
            return;
        }
        next = reader.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballot_common::NoopSink;
    use std::sync::Arc;

    fn settings(participants: usize) -> CoordinatorSettings {
        CoordinatorSettings {
            listen: "127.0.0.1:0".parse().unwrap(),
            participants,
            timeout: Duration::from_secs(2),
            options: vec!["A".into(), "B".into()],
            outcome_window: Some(Duration::from_secs(3)),
        }
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_settings() {
        let mut s = settings(0);
        assert!(matches!(
            Coordinator::bind(s.clone(), Arc::new(NoopSink)).await,
            Err(CoordinatorError::InvalidSettings(_))
        ));
        s.participants = 2;
        s.options.clear();
        assert!(Coordinator::bind(s, Arc::new(NoopSink)).await.is_err());
    }

    #[tokio::test]
    async fn test_details_exclude_recipient_and_outcomes_are_collected() {
        let coordinator = Coordinator::bind(settings(2), Arc::new(NoopSink)).await.unwrap();
        let addr = coordinator.local_addr().unwrap();
        let run = tokio::spawn(coordinator.run());

        let mut a = Session::connect(addr).await.unwrap();
        a.send_line("JOIN 9001").await.unwrap();
        let mut b = Session::connect(addr).await.unwrap();
        b.send_line("JOIN 9002").await.unwrap();

        assert_eq!(a.recv_line().await.unwrap(), "DETAILS 9002");
        assert_eq!(a.recv_line().await.unwrap(), "VOTE_OPTIONS A B");
        assert_eq!(b.recv_line().await.unwrap(), "DETAILS 9001");
        assert_eq!(b.recv_line().await.unwrap(), "VOTE_OPTIONS A B");

        a.send_line("OUTCOME B 9001 9002").await.unwrap();
        b.send_line("OUTCOME B 9001 9002").await.unwrap();

        let mut report = run.await.unwrap().unwrap();
        report.roster.sort();
        assert_eq!(report.roster, vec![ParticipantId(9001), ParticipantId(9002)]);
        assert_eq!(report.agreed_winner(), Some("B"));
    }

    #[tokio::test]
    async fn test_non_join_first_line_is_abandoned() {
        let coordinator = Coordinator::bind(settings(1), Arc::new(NoopSink)).await.unwrap();
        let addr = coordinator.local_addr().unwrap();
        let run = tokio::spawn(coordinator.run());

        let mut rogue = Session::connect(addr).await.unwrap();
        rogue.send_line("VOTE 1 A").await.unwrap();
        assert!(matches!(rogue.recv_line().await, Err(_)));

        let mut ok = Session::connect(addr).await.unwrap();
        ok.send_line("JOIN 9001").await.unwrap();
        assert_eq!(ok.recv_line().await.unwrap(), "DETAILS");
        assert_eq!(ok.recv_line().await.unwrap(), "VOTE_OPTIONS A B");
        ok.send_line("OUTCOME A 9001").await.unwrap();

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.roster, vec![ParticipantId(9001)]);
        assert_eq!(report.rejected, 0);
    }
}
