use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies a participant by the port it listens on for peer sessions.
///
/// The id is announced in `JOIN`, relayed in `DETAILS`/`VOTE`/`OUTCOME`
/// and is the key of the vote ledger. Ordering is numeric, so rosters and
/// outcome reports print in a stable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u16);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid participant id: {0:?}")]
pub struct ParseParticipantIdError(pub String);

impl ParticipantId {
    pub fn port(&self) -> u16 {
        self.0
    }

    /// Network target of this participant on the given host.
    pub fn socket_addr(&self, host: IpAddr) -> SocketAddr {
        SocketAddr::new(host, self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = ParseParticipantIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<u16>() {
            Ok(port) if port != 0 => Ok(ParticipantId(port)),
            _ => Err(ParseParticipantIdError(s.to_string())),
        }
    }
}

impl From<u16> for ParticipantId {
    fn from(port: u16) -> Self {
        ParticipantId(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_and_display() {
        let id: ParticipantId = "9001".parse().unwrap();
        assert_eq!(id, ParticipantId(9001));
        assert_eq!(id.to_string(), "9001");
    }

    #[test]
    fn test_rejects_garbage_and_port_zero() {
        assert!("abc".parse::<ParticipantId>().is_err());
        assert!("0".parse::<ParticipantId>().is_err());
        assert!("70000".parse::<ParticipantId>().is_err());
        assert!("".parse::<ParticipantId>().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let id = ParticipantId(9002);
        let addr = id.socket_addr(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(addr.to_string(), "127.0.0.1:9002");
    }
}
