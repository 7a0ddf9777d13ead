//! logger.rs
//!
//! Event sink that forwards protocol milestones to the external audit logger
//! as UDP datagrams, one JSON object per event:
//!
//! ```text
//! {"ts":"2026-10-16T10:00:00.000Z","source":"participant-9001","event":{"kind":"begin_round","round":1}}
//! ```
//!
//! `notify` only enqueues. A background task owns the socket, so a missing or
//! slow logger never stalls a round.

use std::net::SocketAddr;

use ballot_common::{EventSink, ProtocolEvent};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::P2pError;

const QUEUE_DEPTH: usize = 1024;

#[derive(Serialize)]
struct Datagram<'a> {
    ts: String,
    source: &'a str,
    event: &'a ProtocolEvent,
}

#[derive(Clone)]
pub struct UdpLoggerSink {
    tx: mpsc::Sender<ProtocolEvent>,
}

impl UdpLoggerSink {
    /// Binds an ephemeral UDP socket and starts the forwarding task.
    pub async fn spawn(source: impl Into<String>, logger: SocketAddr) -> Result<Self, P2pError> {
        let bind: SocketAddr = if logger.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        let source = source.into();
        let (tx, mut rx) = mpsc::channel::<ProtocolEvent>(QUEUE_DEPTH);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let datagram = Datagram {
                    ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                    source: &source,
                    event: &event,
                };
                let payload = match serde_json::to_vec(&datagram) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("could not encode audit event {}: {}", event.kind(), e);
                        continue;
                    }
                };
                if let Err(e) = socket.send_to(&payload, logger).await {
                    debug!(%logger, "audit datagram dropped: {}", e);
                }
            }
        });

        Ok(Self { tx })
    }
}

impl EventSink for UdpLoggerSink {
    fn notify(&self, event: ProtocolEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("audit queue unavailable, event dropped: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballot_common::ParticipantId;
    use std::time::Duration;

    #[tokio::test]
    async fn test_events_arrive_as_json_datagrams() {
        let logger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sink = UdpLoggerSink::spawn("participant-9001", logger.local_addr().unwrap())
            .await
            .unwrap();

        sink.notify(ProtocolEvent::DetailsReceived { peers: vec![ParticipantId(9002)] });

        let mut buf = [0u8; 1024];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), logger.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();

        assert_eq!(value["source"], "participant-9001");
        assert_eq!(value["event"]["kind"], "details_received");
        assert_eq!(value["event"]["peers"][0], 9002);
        assert!(value["ts"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_unreachable_logger_does_not_block() {
        let addr = {
            let s = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            s.local_addr().unwrap()
        };
        let sink = UdpLoggerSink::spawn("coordinator", addr).await.unwrap();
        for round in 1..=10 {
            sink.notify(ProtocolEvent::BeginRound { round });
        }
    }
}
