use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::{ConfigError, CoordinatorConfig, ParticipantConfig};

/// Flags override values loaded from `--config`.
#[derive(Parser, Debug, Clone)]
#[command(name = "coordinator")]
#[command(about = "Assembles the participant roster and hands out peers and vote options")]
pub struct CoordinatorArgs {
    /// JSON config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Audit logger address (UDP)
    #[arg(long)]
    pub logger: Option<SocketAddr>,

    /// Number of participants to wait for
    #[arg(short = 'n', long)]
    pub participants: Option<usize>,

    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// How long to wait for OUTCOME reports after the broadcast
    #[arg(long)]
    pub outcome_window_ms: Option<u64>,

    /// Vote options, e.g. `A B C` or `A,B,C`
    #[arg(value_delimiter = ',')]
    pub options: Vec<String>,
}

impl CoordinatorArgs {
    pub fn resolve(self) -> Result<CoordinatorConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => CoordinatorConfig::load_from_file(path)?,
            None => CoordinatorConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if self.logger.is_some() {
            config.logger = self.logger;
        }
        if let Some(n) = self.participants {
            config.participants = n;
        }
        if let Some(t) = self.timeout_ms {
            config.timeout_ms = t;
        }
        if self.outcome_window_ms.is_some() {
            config.outcome_window_ms = self.outcome_window_ms;
        }
        if !self.options.is_empty() {
            config.options = self.options;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "participant")]
#[command(about = "Joins a ballot, gossips votes with its peers and reports the outcome")]
pub struct ParticipantArgs {
    /// JSON config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub coordinator: Option<SocketAddr>,

    /// Audit logger address (UDP)
    #[arg(long)]
    pub logger: Option<SocketAddr>,

    /// Own listen address; port 0 picks a free port
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Number of gossip rounds (defaults to the number of peers)
    #[arg(long)]
    pub max_rounds: Option<u32>,

    #[arg(long)]
    pub connect_attempts: Option<usize>,

    #[arg(long)]
    pub retry_delay_ms: Option<u64>,
}

impl ParticipantArgs {
    pub fn resolve(self) -> Result<ParticipantConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ParticipantConfig::load_from_file(path)?,
            None => ParticipantConfig::default(),
        };

        if let Some(addr) = self.coordinator {
            config.coordinator = addr;
        }
        if self.logger.is_some() {
            config.logger = self.logger;
        }
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(t) = self.timeout_ms {
            config.timeout_ms = t;
        }
        if self.max_rounds.is_some() {
            config.max_rounds = self.max_rounds;
        }
        if let Some(n) = self.connect_attempts {
            config.connect_attempts = n;
        }
        if let Some(d) = self.retry_delay_ms {
            config.retry_delay_ms = d;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "generate_configs")]
#[command(about = "Writes a coordinator config and one config per participant for local runs")]
pub struct GenerateArgs {
    /// Output directory
    #[arg(default_value = "ballot-configs")]
    pub dir: PathBuf,

    /// Number of participants
    #[arg(default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..))]
    pub participants: u16,

    /// Vote options
    #[arg(default_values_t = ["A".to_string(), "B".to_string(), "C".to_string()])]
    pub options: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_flags() {
        let args = CoordinatorArgs::try_parse_from([
            "coordinator",
            "--listen",
            "127.0.0.1:9100",
            "-n",
            "4",
            "--timeout-ms",
            "250",
            "A,B",
            "C",
        ])
        .unwrap();
        let config = args.resolve().unwrap();

        assert_eq!(config.listen.port(), 9100);
        assert_eq!(config.participants, 4);
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.options, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_coordinator_without_options_is_rejected() {
        let args = CoordinatorArgs::try_parse_from(["coordinator"]).unwrap();
        assert!(matches!(args.resolve(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        ParticipantConfig {
            timeout_ms: 900,
            ..Default::default()
        }
        .save_to_file(&path)
        .unwrap();

        let args = ParticipantArgs::try_parse_from([
            "participant",
            "--config",
            path.to_str().unwrap(),
            "--max-rounds",
            "3",
        ])
        .unwrap();
        let config = args.resolve().unwrap();

        assert_eq!(config.timeout_ms, 900);
        assert_eq!(config.max_rounds, Some(3));
    }

    #[test]
    fn test_generate_defaults() {
        let args = GenerateArgs::try_parse_from(["generate_configs"]).unwrap();
        assert_eq!(args.dir, PathBuf::from("ballot-configs"));
        assert_eq!(args.participants, 3);
        assert_eq!(args.options, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_generate_rejects_bad_count() {
        assert!(GenerateArgs::try_parse_from(["generate_configs", "out", "three"]).is_err());
        assert!(GenerateArgs::try_parse_from(["generate_configs", "out", "0"]).is_err());

        let args = GenerateArgs::try_parse_from(["generate_configs", "out", "5", "X", "Y"]).unwrap();
        assert_eq!(args.participants, 5);
        assert_eq!(args.options, vec!["X", "Y"]);
    }
}
