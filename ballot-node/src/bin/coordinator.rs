use clap::Parser;
use tracing::{error, info};

use ballot_consensus::Coordinator;
use ballot_node::{cli::CoordinatorArgs, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CoordinatorArgs::parse().resolve()?;

    let source = telemetry::coordinator_source(config.listen.port());
    let _guard = telemetry::init(&source);
    let sink = telemetry::event_sink(&source, config.logger).await;

    info!("--- STARTING COORDINATOR ---");
    info!("Listen: {}", config.listen);
    info!("Participants: {}, options: {:?}", config.participants, config.options);

    let coordinator = match Coordinator::bind(config.settings(), sink).await {
        Ok(c) => c,
        Err(e) => {
            error!("Coordinator failed to start: {}", e);
            return Err(e.into());
        }
    };

    let report = coordinator.run().await?;
    match report.agreed_winner() {
        Some(winner) => info!("🏁 Run finished, winner {}", winner),
        None => info!("🏁 Run finished without an agreed winner"),
    }
    Ok(())
}
