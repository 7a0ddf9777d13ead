//! Writes a coordinator config and one config per participant under a
//! directory, ready for local runs:
//!
//! ```text
//! generate_configs [dir] [participants] [options...]
//! ```

use std::fs;
use std::net::SocketAddr;

use clap::Parser;

use ballot_node::cli::GenerateArgs;
use ballot_node::config::{CoordinatorConfig, ParticipantConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = GenerateArgs::parse();
    let count = usize::from(args.participants);

    let coordinator_addr = SocketAddr::from(([127, 0, 0, 1], 9000));
    let base_port: u16 = 9001;
    if base_port.checked_add(args.participants - 1).is_none() {
        return Err(format!("{} participants do not fit above port {}", count, base_port).into());
    }

    println!("🚀 Generating configuration for {} participants...", count);
    fs::create_dir_all(&args.dir)?;

    let coordinator = CoordinatorConfig {
        listen: coordinator_addr,
        participants: count,
        options: args.options,
        ..Default::default()
    };
    coordinator.validate()?;
    coordinator.save_to_file(args.dir.join("coordinator.json"))?;

    for port in (0..args.participants).map(|i| base_port + i) {
        let config = ParticipantConfig {
            coordinator: coordinator_addr,
            listen: SocketAddr::from(([127, 0, 0, 1], port)),
            ..Default::default()
        };
        let path = args.dir.join(format!("participant-{}.json", port));
        config.save_to_file(&path)?;
        println!("✅ {}", path.display());
    }

    Ok(())
}
