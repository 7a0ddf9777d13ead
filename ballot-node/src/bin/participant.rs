use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use ballot_common::NoopSink;
use ballot_consensus::Participant;
use ballot_node::{cli::ParticipantArgs, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ParticipantArgs::parse().resolve()?;

    // Bound first: the port is our id and names the audit file and datagrams.
    let participant = Participant::bind(config.settings(), Arc::new(NoopSink)).await?;
    let id = participant.id();
    let source = telemetry::participant_source(id);
    let _guard = telemetry::init(&source);
    let participant = participant.with_sink(telemetry::event_sink(&source, config.logger).await);

    info!("--- STARTING PARTICIPANT {} ---", id);
    info!("Coordinator: {}", config.coordinator);

    match participant.run().await {
        Ok(report) => {
            info!(
                "🏁 Participant {} voted {}, outcome {} over {:?}",
                report.id, report.vote.option, report.outcome.winner, report.outcome.participants
            );
            Ok(())
        }
        Err(e) => {
            error!("Participant {} failed: {}", id, e);
            Err(e.into())
        }
    }
}
