//! engine.rs
//!
//! Round engine of the gossip phase.
//!
//! One owner task holds the vote registry, the round counter and the
//! bookkeeping of every worker. Workers only talk to it through channels:
//! senders get one command per round, receivers forward whatever VOTE lines
//! they read. A round closes when every live sender has reported and every
//! expected receiver is ready or retired, or when the round deadline fires.
//!
//! A peer with nothing new to relay stays silent, so a deadline is not
//! always a fault. When the ledger already holds every participant and every
//! sender has delivered, the wait is logged as a quiet round; anything else
//! is a stall and goes to the audit log as `PeerStalled`.
//!
//! ```text
//!   round r:  BeginRound -> dispatch delta(r-1) -> wait(barrier | deadline)
//!             -> rotate registry -> EndRound -> r + 1
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use ballot_common::{ParticipantId, ProtocolEvent, SharedSink, Vote};
use ballot_p2p::{SessionReader, SessionWriter};

use super::registry::VoteRegistry;
use super::worker::{ReceiverSlot, ReceiverWorker, SenderCommand, SenderWorker, WorkerEvent};

#[derive(Debug, Clone, Copy)]
pub struct RoundConfig {
    pub max_rounds: u32,
    /// Upper bound on a single round.
    pub timeout: Duration,
}

/// What one run of the engine produced.
#[derive(Debug, Clone)]
pub struct GossipSummary {
    pub registry: VoteRegistry,
    pub rounds: u32,
    /// Rounds closed by the deadline while votes or deliveries were missing.
    pub stalled_rounds: Vec<u32>,
    /// Rounds closed by the deadline with nothing left to learn.
    pub quiet_rounds: Vec<u32>,
}

#[derive(Debug, Default)]
struct ReceiverState {
    peer: Option<ParticipantId>,
    ready: bool,
    /// Messages that arrived while already ready, credited to later rounds.
    banked: u32,
    retired: bool,
}

struct SenderHandle {
    commands: mpsc::UnboundedSender<SenderCommand>,
    task: JoinHandle<()>,
    live: bool,
}

pub struct RoundEngine {
    own: Vote,
    expected_receivers: usize,
    config: RoundConfig,
    sink: SharedSink,
    registry: VoteRegistry,
    round_tx: watch::Sender<u32>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    senders: BTreeMap<ParticipantId, SenderHandle>,
    receivers: Vec<ReceiverState>,
    receiver_tasks: Vec<JoinHandle<()>>,
}

impl RoundEngine {
    /// `expected_receivers` is the number of inbound sessions the barrier
    /// waits for, normally the size of the peer set.
    pub fn new(own: Vote, expected_receivers: usize, config: RoundConfig, sink: SharedSink) -> Self {
        let mut registry = VoteRegistry::new();
        registry.seed(&own);
        let (round_tx, _) = watch::channel(0);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            own,
            expected_receivers,
            config,
            sink,
            registry,
            round_tx,
            events_tx,
            events_rx,
            senders: BTreeMap::new(),
            receivers: Vec::new(),
            receiver_tasks: Vec::new(),
        }
    }

    pub fn add_sender(&mut self, peer: ParticipantId, writer: SessionWriter) {
        let (commands, rx) = mpsc::unbounded_channel();
        let worker = SenderWorker {
            peer,
            writer,
            commands: rx,
            events: self.events_tx.clone(),
        };
        let task = tokio::spawn(worker.run());
        self.senders.insert(peer, SenderHandle { commands, task, live: true });
    }

    pub fn add_receiver(&mut self, reader: SessionReader) -> ReceiverSlot {
        let slot = self.receivers.len();
        self.receivers.push(ReceiverState::default());
        let worker = ReceiverWorker {
            slot,
            reader,
            max_rounds: self.config.max_rounds,
            round: self.round_tx.subscribe(),
            events: self.events_tx.clone(),
        };
        self.receiver_tasks.push(tokio::spawn(worker.run()));
        slot
    }

    /// Drives every round to completion. Inbound sessions that are still
    /// being accepted arrive through `inbound`.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<SessionReader>) -> GossipSummary {
        let mut delta: Vec<Vote> = Vec::new();
        let mut stalled_rounds = Vec::new();
        let mut quiet_rounds = Vec::new();
        let mut inbound_open = true;

        for round in 1..=self.config.max_rounds {
            self.round_tx.send_replace(round);
            self.sink.notify(ProtocolEvent::BeginRound { round });
            info!("🔄 Round {}/{} started", round, self.config.max_rounds);

            let outgoing = if round == 1 {
                vec![self.own.clone()]
            } else {
                std::mem::take(&mut delta)
            };
            let mut waiting = self.dispatch(round, outgoing);
            self.arm_receivers();

            let deadline = Instant::now() + self.config.timeout;
            while !self.barrier_reached(&waiting) {
                tokio::select! {
                    Some(event) = self.events_rx.recv() => self.handle(event, &mut waiting),
                    accepted = inbound.recv(), if inbound_open => match accepted {
                        Some(reader) => {
                            let slot = self.add_receiver(reader);
                            debug!(slot, "inbound peer session attached");
                        }
                        None => inbound_open = false,
                    },
                    _ = sleep_until(deadline) => {
                        let pending = self.pending_workers(&waiting);
                        if self.is_quiet(&waiting) {
                            debug!(round, ?pending, "round deadline reached, nothing left to learn");
                            quiet_rounds.push(round);
                        } else {
                            warn!(round, ?pending, "⏱️ round deadline reached, proceeding without them");
                            self.sink.notify(ProtocolEvent::PeerStalled { round, pending });
                            stalled_rounds.push(round);
                        }
                        break;
                    }
                }
            }

            delta = self.registry.rotate();
            self.sink.notify(ProtocolEvent::EndRound { round });
            info!(
                "✅ Round {} complete, {} votes known, {} to relay",
                round,
                self.registry.len(),
                delta.len()
            );
        }

        self.shutdown().await;

        GossipSummary {
            registry: self.registry,
            rounds: self.config.max_rounds,
            stalled_rounds,
            quiet_rounds,
        }
    }

    fn dispatch(&mut self, round: u32, votes: Vec<Vote>) -> BTreeSet<ParticipantId> {
        let mut waiting = BTreeSet::new();
        for (peer, sender) in self.senders.iter_mut().filter(|(_, s)| s.live) {
            let command = SenderCommand::Round { round, votes: votes.clone() };
            if sender.commands.send(command).is_ok() {
                waiting.insert(*peer);
            } else {
                sender.live = false;
            }
        }
        waiting
    }

    fn arm_receivers(&mut self) {
        for state in self.receivers.iter_mut().filter(|r| !r.retired) {
            if state.banked > 0 {
                state.banked -= 1;
                state.ready = true;
            } else {
                state.ready = false;
            }
        }
    }

    fn barrier_reached(&self, waiting: &BTreeSet<ParticipantId>) -> bool {
        let satisfied = self.receivers.iter().filter(|r| r.ready || r.retired).count();
        waiting.is_empty() && satisfied >= self.expected_receivers
    }

    /// Every participant's vote is known and every sender delivered, so the
    /// receivers still pending can only be peers with an empty delta.
    fn is_quiet(&self, waiting: &BTreeSet<ParticipantId>) -> bool {
        waiting.is_empty() && self.registry.len() > self.expected_receivers
    }

    fn pending_workers(&self, waiting: &BTreeSet<ParticipantId>) -> Vec<String> {
        let mut pending: Vec<String> = waiting.iter().map(|p| format!("send:{}", p)).collect();
        for (slot, state) in self.receivers.iter().enumerate() {
            if !state.ready && !state.retired {
                match state.peer {
                    Some(peer) => pending.push(format!("recv:{}", peer)),
                    None => pending.push(format!("recv:#{}", slot)),
                }
            }
        }
        let missing = self.expected_receivers.saturating_sub(self.receivers.len());
        pending.extend((0..missing).map(|_| "recv:unconnected".to_string()));
        pending
    }

    fn handle(&mut self, event: WorkerEvent, waiting: &mut BTreeSet<ParticipantId>) {
        match event {
            WorkerEvent::Sent { peer, round, votes } => {
                if !votes.is_empty() {
                    self.sink.notify(ProtocolEvent::VotesSent { peer, votes });
                }
                if round == *self.round_tx.borrow() {
                    waiting.remove(&peer);
                }
            }
            WorkerEvent::SenderFailed { peer, round, reason } => {
                debug!(%peer, round, "sender retired: {}", reason);
                if let Some(sender) = self.senders.get_mut(&peer) {
                    sender.live = false;
                }
                waiting.remove(&peer);
            }
            WorkerEvent::Received { slot, peer, votes } => {
                let learned = self.registry.merge_all(&votes);
                if let Some(peer) = peer {
                    debug!(%peer, learned, "votes merged");
                    self.sink.notify(ProtocolEvent::VotesReceived { peer, votes });
                }
                if let Some(state) = self.receivers.get_mut(slot) {
                    state.peer = state.peer.or(peer);
                    if state.ready {
                        state.banked += 1;
                    } else {
                        state.ready = true;
                    }
                }
            }
            WorkerEvent::ReceiverRetired { slot, peer, reason } => {
                info!(?peer, "📴 inbound session ended: {}", reason);
                if let Some(state) = self.receivers.get_mut(slot) {
                    state.peer = state.peer.or(peer);
                    state.retired = true;
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        self.round_tx.send_replace(self.config.max_rounds.saturating_add(1));

        let mut tasks = Vec::new();
        for (_, sender) in std::mem::take(&mut self.senders) {
            let _ = sender.commands.send(SenderCommand::Close);
            tasks.push(sender.task);
        }
        // A sender stuck on a dead peer must not hold up the decision.
        if tokio::time::timeout(self.config.timeout, join_all(tasks)).await.is_err() {
            warn!("some peer sessions did not close in time");
        }

        for task in self.receiver_tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballot_common::NoopSink;
    use ballot_p2p::{Message, Session};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn pair() -> (Session, Session) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(Session::connect(addr), listener.accept());
        (client.unwrap(), Session::from_stream(accepted.unwrap().0).unwrap())
    }

    fn config(max_rounds: u32, timeout_ms: u64) -> RoundConfig {
        RoundConfig { max_rounds, timeout: Duration::from_millis(timeout_ms) }
    }

    #[tokio::test]
    async fn test_round_one_sends_own_vote_and_relays_delta() {
        let own = Vote::new(ParticipantId(9001), "A");
        let mut engine = RoundEngine::new(own, 1, config(2, 2_000), Arc::new(NoopSink));

        // Outbound to 9002, inbound from 9002.
        let (out_local, mut out_remote) = pair().await;
        let (in_local, mut in_remote) = pair().await;
        engine.add_sender(ParticipantId(9002), out_local.into_split().1);
        engine.add_receiver(in_local.into_split().0);

        let (_inbound_tx, inbound_rx) = mpsc::channel(1);
        let run = tokio::spawn(engine.run(inbound_rx));

        assert_eq!(
            out_remote.recv().await.unwrap(),
            Message::Vote { votes: vec![Vote::new(ParticipantId(9001), "A")] }
        );

        // Peer 9002 reports its own vote and one it heard from 9003.
        in_remote
            .send(&Message::Vote { votes: vec![Vote::new(ParticipantId(9002), "B")] })
            .await
            .unwrap();

        // Round two relays what round one taught us.
        assert_eq!(
            out_remote.recv().await.unwrap(),
            Message::Vote { votes: vec![Vote::new(ParticipantId(9002), "B")] }
        );
        in_remote
            .send(&Message::Vote { votes: vec![Vote::new(ParticipantId(9003), "C")] })
            .await
            .unwrap();

        let summary = run.await.unwrap();
        assert_eq!(summary.rounds, 2);
        assert!(summary.stalled_rounds.is_empty());
        assert_eq!(summary.registry.len(), 3);
    }

    #[tokio::test]
    async fn test_silent_peer_is_absorbed_by_deadline() {
        let own = Vote::new(ParticipantId(9001), "A");
        let mut engine = RoundEngine::new(own, 1, config(2, 150), Arc::new(NoopSink));

        let (out_local, _out_remote) = pair().await;
        let (in_local, _in_remote) = pair().await;
        engine.add_sender(ParticipantId(9002), out_local.into_split().1);
        engine.add_receiver(in_local.into_split().0);

        let (_inbound_tx, inbound_rx) = mpsc::channel(1);
        let summary = engine.run(inbound_rx).await;

        assert_eq!(summary.stalled_rounds, vec![1, 2]);
        assert_eq!(summary.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_receiver_does_not_stall() {
        let own = Vote::new(ParticipantId(9001), "A");
        let mut engine = RoundEngine::new(own, 1, config(1, 5_000), Arc::new(NoopSink));

        let (in_local, in_remote) = pair().await;
        engine.add_receiver(in_local.into_split().0);
        in_remote.close().await;

        let (_inbound_tx, inbound_rx) = mpsc::channel(1);
        let started = Instant::now();
        let summary = engine.run(inbound_rx).await;

        assert!(summary.stalled_rounds.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_early_message_is_banked_for_next_round() {
        let own = Vote::new(ParticipantId(9001), "A");
        let mut engine = RoundEngine::new(own, 1, config(2, 5_000), Arc::new(NoopSink));

        let (in_local, mut in_remote) = pair().await;
        engine.add_receiver(in_local.into_split().0);

        // A fast peer that already finished both of its rounds.
        in_remote
            .send(&Message::Vote { votes: vec![Vote::new(ParticipantId(9002), "B")] })
            .await
            .unwrap();
        in_remote
            .send(&Message::Vote { votes: vec![Vote::new(ParticipantId(9003), "C")] })
            .await
            .unwrap();

        let (_inbound_tx, inbound_rx) = mpsc::channel(1);
        let started = Instant::now();
        let summary = engine.run(inbound_rx).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(summary.stalled_rounds.is_empty());
        assert!(summary.registry.contains(&ParticipantId(9003)));
    }

    #[tokio::test]
    async fn test_empty_delta_round_is_quiet() {
        let own = Vote::new(ParticipantId(9001), "A");
        let mut engine = RoundEngine::new(own, 1, config(2, 150), Arc::new(NoopSink));

        let (out_local, mut out_remote) = pair().await;
        let (in_local, mut in_remote) = pair().await;
        engine.add_sender(ParticipantId(9002), out_local.into_split().1);
        engine.add_receiver(in_local.into_split().0);

        let (_inbound_tx, inbound_rx) = mpsc::channel(1);
        let run = tokio::spawn(engine.run(inbound_rx));

        // 9002 learns nothing new in round one, so it has nothing to relay in
        // round two.
        in_remote
            .send(&Message::Vote { votes: vec![Vote::new(ParticipantId(9002), "B")] })
            .await
            .unwrap();
        assert!(matches!(out_remote.recv().await.unwrap(), Message::Vote { .. }));
        assert!(matches!(out_remote.recv().await.unwrap(), Message::Vote { .. }));

        let summary = run.await.unwrap();
        assert!(summary.stalled_rounds.is_empty());
        assert_eq!(summary.quiet_rounds, vec![2]);
        assert_eq!(summary.registry.len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_with_unbounded_round_count() {
        let own = Vote::new(ParticipantId(9001), "A");
        let mut engine = RoundEngine::new(own, 0, config(u32::MAX, 100), Arc::new(NoopSink));

        engine.shutdown().await;
        assert_eq!(*engine.round_tx.borrow(), u32::MAX);
    }
}
