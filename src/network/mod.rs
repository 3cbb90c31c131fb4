//! Network module - Handles the TCP game sessions
//!
//! Provides:
//! - Framed message transport over any async byte stream
//! - Server that accepts players, groups them into rounds and runs the tables
//! - Client that joins a table and plays rounds with a pluggable strategy

mod client;
mod connection;
mod lobby;
mod round;
mod server;
mod session;

pub use client::*;
pub use connection::*;
pub use server::*;
pub use session::{SessionId, SessionInfo, SessionState};

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::DEFAULT_GAME_PORT;

/// Runtime settings for a game server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name announced to players in Welcome
    pub name: String,
    /// TCP port to accept sessions on; 0 lets the OS choose
    pub port: u16,
    /// How long a forming round waits for more players after the first joins
    pub join_window: Duration,
    /// A round starts as soon as this many players wait
    pub max_players: usize,
    /// Idle player is stood automatically after this long
    pub turn_timeout: Duration,
    /// Every remaining player is stood once a round runs this long
    pub round_deadline: Duration,
    /// A connection that never names its player is closed after this long
    pub name_timeout: Duration,
    /// Fixed deck seed; round `n` shuffles with `seed + n`
    pub deck_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "tablecast".to_string(),
            port: DEFAULT_GAME_PORT,
            join_window: Duration::from_secs(10),
            max_players: 4,
            turn_timeout: Duration::from_secs(30),
            round_deadline: Duration::from_secs(300),
            name_timeout: Duration::from_secs(30),
            deck_seed: None,
        }
    }
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_join_window(mut self, window: Duration) -> Self {
        self.join_window = window;
        self
    }

    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players.max(1);
        self
    }

    pub fn with_deck_seed(mut self, seed: u64) -> Self {
        self.deck_seed = Some(seed);
        self
    }

    pub fn with_timeouts(mut self, turn: Duration, round: Duration) -> Self {
        self.turn_timeout = turn;
        self.round_deadline = round;
        self
    }

    pub fn with_name_timeout(mut self, timeout: Duration) -> Self {
        self.name_timeout = timeout;
        self
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}

/// Trimmed player name, if it is acceptable
pub fn validate_name(name: &str) -> Option<&str> {
    let trimmed = name.trim();
    let len = trimmed.len();
    (1..=crate::protocol::MAX_NAME_LEN).contains(&len).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Ann "), Some("Ann"));
        assert_eq!(validate_name("   "), None);
        assert_eq!(validate_name(""), None);
        assert_eq!(validate_name(&"x".repeat(33)), None);
        assert!(validate_name(&"x".repeat(32)).is_some());
    }

    #[test]
    fn test_max_players_never_zero() {
        assert_eq!(ServerConfig::default().with_max_players(0).max_players, 1);
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve_host("127.0.0.1", 4000).await.unwrap();
        assert_eq!(addr.port(), 4000);
    }
}
