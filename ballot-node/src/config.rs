use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ballot_consensus::{CoordinatorSettings, ParticipantSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn save_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

fn load_json<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> Result<T, ConfigError> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub listen: SocketAddr,
    /// Audit logger receiving UDP event datagrams.
    #[serde(default)]
    pub logger: Option<SocketAddr>,
    pub participants: usize,
    pub timeout_ms: u64,
    pub options: Vec<String>,
    #[serde(default)]
    pub outcome_window_ms: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 9000)),
            logger: None,
            participants: 3,
            timeout_ms: 1_000,
            options: Vec::new(),
            outcome_window_ms: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.participants == 0 {
            return Err(invalid("participants must be at least 1"));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms must be positive"));
        }
        validate_options(&self.options)
    }

    pub fn settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            listen: self.listen,
            participants: self.participants,
            timeout: Duration::from_millis(self.timeout_ms),
            options: self.options.clone(),
            outcome_window: self.outcome_window_ms.map(Duration::from_millis),
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        save_json(self, path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        load_json(path)
    }
}

/// Options travel as single tokens on the wire.
fn validate_options(options: &[String]) -> Result<(), ConfigError> {
    if options.is_empty() {
        return Err(invalid("at least one vote option is required"));
    }
    let mut seen = HashSet::new();
    for option in options {
        if option.is_empty() || option.chars().any(char::is_whitespace) {
            return Err(invalid(format!("option {:?} must be a single non-empty token", option)));
        }
        if !seen.insert(option.as_str()) {
            return Err(invalid(format!("option {:?} is listed twice", option)));
        }
    }
    Ok(())
}

fn default_connect_attempts() -> usize {
    50
}

fn default_retry_delay_ms() -> u64 {
    100
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantConfig {
    pub coordinator: SocketAddr,
    #[serde(default)]
    pub logger: Option<SocketAddr>,
    /// Port 0 lets the OS choose; the bound port becomes the participant id.
    pub listen: SocketAddr,
    pub timeout_ms: u64,
    #[serde(default)]
    pub max_rounds: Option<u32>,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            coordinator: SocketAddr::from(([127, 0, 0, 1], 9000)),
            logger: None,
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            timeout_ms: 1_000,
            max_rounds: None,
            connect_attempts: default_connect_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl ParticipantConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms must be positive"));
        }
        if self.connect_attempts == 0 {
            return Err(invalid("connect_attempts must be at least 1"));
        }
        if self.max_rounds == Some(0) {
            return Err(invalid("max_rounds must be positive when set"));
        }
        if self.listen == self.coordinator {
            return Err(invalid("listen address collides with the coordinator"));
        }
        Ok(())
    }

    pub fn settings(&self) -> ParticipantSettings {
        ParticipantSettings {
            coordinator: self.coordinator,
            listen: self.listen,
            timeout: Duration::from_millis(self.timeout_ms),
            max_rounds: self.max_rounds,
            connect_attempts: self.connect_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        save_json(self, path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        load_json(path)
    }
}
