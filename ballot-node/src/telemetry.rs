//! telemetry.rs
//!
//! Logging for both binaries. Status lines go to stdout through an
//! `EnvFilter`; protocol milestones are logged at the `audit` target and end
//! up only in `logs/audit-<name>.log`.

use std::sync::Arc;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use ballot_common::{EventSink, FanoutSink, ParticipantId, ProtocolEvent, SharedSink};
use ballot_p2p::UdpLoggerSink;

pub const AUDIT_TARGET: &str = "audit";

/// Installs the global subscriber. Keep the guard alive until exit or the
/// tail of the audit file is lost.
pub fn init(name: &str) -> WorkerGuard {
    if let Err(e) = std::fs::create_dir_all("logs") {
        eprintln!("could not create logs/: {}", e);
    }
    let file_appender = tracing_appender::rolling::never("logs", format!("audit-{}.log", name));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let audit_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() == AUDIT_TARGET
        }));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ballot_consensus=debug".into()),
        )
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() != AUDIT_TARGET
        }));

    tracing_subscriber::registry()
        .with(audit_layer)
        .with(stdout_layer)
        .init();

    guard
}

/// Writes every protocol event to the audit log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, event: ProtocolEvent) {
        info!(target: "audit", "{}", event);
    }
}

/// Name a participant uses for its audit file and logger datagrams.
pub fn participant_source(id: ParticipantId) -> String {
    format!("participant-{}", id)
}

pub fn coordinator_source(port: u16) -> String {
    format!("coordinator-{}", port)
}

/// Audit file plus, when configured, the external UDP logger. Call after
/// `init` so a logger that cannot be reached is reported.
pub async fn event_sink(source: &str, logger: Option<std::net::SocketAddr>) -> SharedSink {
    let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
    if let Some(addr) = logger {
        match UdpLoggerSink::spawn(source, addr).await {
            Ok(udp) => sink = sink.with(Arc::new(udp)),
            Err(e) => tracing::warn!("audit logger {} unavailable: {}", addr, e),
        }
    }
    Arc::new(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ballot_common::NoopSink;
    use ballot_consensus::{Participant, ParticipantSettings};
    use ballot_p2p::Session;
    use tokio::net::{TcpListener, UdpSocket};

    #[tokio::test]
    async fn test_participant_datagrams_carry_its_id() {
        let logger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let logger_addr = logger.local_addr().unwrap();

        // A coordinator that hangs up right after JOIN.
        let coordinator = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let coordinator_addr = coordinator.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = coordinator.accept().await.unwrap();
            let mut session = Session::from_stream(stream).unwrap();
            let _join = session.recv().await.unwrap();
            session.close().await;
        });

        let settings = ParticipantSettings::new(
            coordinator_addr,
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_millis(200),
        );
        let participant = Participant::bind(settings, Arc::new(NoopSink)).await.unwrap();
        let id = participant.id();
        let sink = event_sink(&participant_source(id), Some(logger_addr)).await;
        let _ = participant.with_sink(sink).run().await;

        let mut buf = [0u8; 2048];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), logger.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let datagram: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();

        assert_eq!(datagram["source"], format!("participant-{}", id));
        assert_eq!(datagram["event"]["kind"], "join_sent");
    }
}
