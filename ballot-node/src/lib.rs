pub mod cli;
pub mod config;
pub mod telemetry;

pub use config::{ConfigError, CoordinatorConfig, ParticipantConfig};
