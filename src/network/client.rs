//! Game client
//!
//! Connects to a table, introduces the player and plays rounds, asking a
//! [`Strategy`] for every decision.

use async_trait::async_trait;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

use super::connection::{Connection, ConnectionError};
use super::validate_name;
use crate::game::Hand;
use crate::protocol::{Card, ErrorCode, Message, PlayerAction, RoundResult};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Connection timeout")]
    Timeout,

    #[error("Invalid player name: {0:?}")]
    InvalidName(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Server rejected the session: {0}")]
    Rejected(String),

    #[error("Server closed the session")]
    ServerClosed,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Decides what to do with a hand
#[async_trait]
pub trait Strategy: Send {
    /// Called when the table waits on this player
    async fn decide(&mut self, hand: &Hand, dealer: &[Card]) -> PlayerAction;

    /// Called with every final result
    async fn settled(&mut self, _result: RoundResult, _hand: &Hand, _dealer: &[Card]) {}
}

/// Hits below a fixed total
#[derive(Debug, Clone, Copy)]
pub struct Threshold {
    pub stand_on: u8,
}

impl Threshold {
    pub fn new(stand_on: u8) -> Self {
        Self { stand_on }
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self { stand_on: 17 }
    }
}

#[async_trait]
impl Strategy for Threshold {
    async fn decide(&mut self, hand: &Hand, _dealer: &[Card]) -> PlayerAction {
        if hand.total() < self.stand_on {
            PlayerAction::Hit
        } else {
            PlayerAction::Stand
        }
    }
}

/// Tally of finished hands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub wins: u32,
    pub losses: u32,
    pub pushes: u32,
}

impl Summary {
    pub fn record(&mut self, result: RoundResult) {
        if result.is_win() {
            self.wins += 1;
        } else if result.is_loss() {
            self.losses += 1;
        } else {
            self.pushes += 1;
        }
    }

    pub fn rounds(&self) -> u32 {
        self.wins + self.losses + self.pushes
    }

    /// Share of rounds won, 0.0 when nothing was played
    pub fn win_rate(&self) -> f64 {
        match self.rounds() {
            0 => 0.0,
            n => f64::from(self.wins) / f64::from(n),
        }
    }
}

/// Settings for joining a table
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub player_name: String,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            player_name: "player".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn new(player_name: impl Into<String>) -> Self {
        Self {
            player_name: player_name.into(),
            ..Default::default()
        }
    }
}

/// A named player at a remote table
pub struct GameClient {
    conn: Connection,
    server_name: String,
    player_name: String,
}

impl GameClient {
    /// Connect, wait for Welcome and send the player's name
    pub async fn connect(server_addr: SocketAddr, config: &ClientConfig) -> ClientResult<Self> {
        let player_name = validate_name(&config.player_name)
            .ok_or_else(|| ClientError::InvalidName(config.player_name.clone()))?
            .to_string();

        tracing::info!("Connecting to {}", server_addr);

        let stream = match tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(server_addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ClientError::Io(e)),
            Err(_) => return Err(ClientError::Timeout),
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay: {}", e);
        }

        let mut conn = Connection::new(stream, server_addr);
        let server_name = match conn.recv_timeout(config.connect_timeout).await? {
            Message::Welcome { server_name } => server_name,
            other => {
                return Err(ClientError::HandshakeFailed(format!(
                    "expected Welcome, got {:?}",
                    other.message_type()
                )))
            }
        };

        conn.send(&Message::PlayerName {
            name: player_name.clone(),
        })
        .await?;

        tracing::info!("Joined {:?} at {} as {:?}", server_name, server_addr, player_name);

        Ok(Self {
            conn,
            server_name,
            player_name,
        })
    }

    /// Connect to a server by hostname
    pub async fn connect_hostname(host: &str, port: u16, config: &ClientConfig) -> ClientResult<Self> {
        let addr = super::resolve_host(host, port).await?;
        Self::connect(addr, config).await
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    /// Next message from the server
    pub async fn recv(&mut self) -> ClientResult<Message> {
        Ok(self.conn.recv().await?)
    }

    pub async fn send_action(&mut self, action: PlayerAction) -> ClientResult<()> {
        self.conn.send(&Message::Action(action)).await?;
        Ok(())
    }

    /// Ask for a seat at the next round
    pub async fn ready(&mut self) -> ClientResult<()> {
        self.conn
            .send(&Message::PlayerName {
                name: self.player_name.clone(),
            })
            .await?;
        Ok(())
    }

    /// Leave the table
    pub async fn bye(mut self) -> ClientResult<()> {
        self.conn.send(&Message::Bye).await?;
        self.conn.close().await?;
        Ok(())
    }

    /// Play `rounds` hands with `strategy`, then leave
    pub async fn play<S>(mut self, rounds: u32, strategy: &mut S) -> ClientResult<Summary>
    where
        S: Strategy + ?Sized,
    {
        let mut summary = Summary::default();

        while summary.rounds() < rounds {
            match self.recv().await? {
                Message::Deal {
                    hand,
                    dealer,
                    your_turn,
                } => {
                    let hand = Hand::from(hand);
                    tracing::debug!(
                        "Hand {:?} ({}), dealer shows {:?}",
                        hand.cards(),
                        hand.total(),
                        dealer
                    );
                    if your_turn {
                        let action = strategy.decide(&hand, &dealer).await;
                        self.send_action(action).await?;
                    }
                }
                Message::Outcome {
                    result,
                    hand,
                    dealer,
                } => {
                    let hand = Hand::from(hand);
                    tracing::info!("Round {}: {:?} with {}", summary.rounds() + 1, result, hand.total());
                    summary.record(result);
                    strategy.settled(result, &hand, &dealer).await;
                    if summary.rounds() < rounds {
                        self.ready().await?;
                    }
                }
                Message::Error {
                    code: ErrorCode::InvalidName,
                    message,
                } => return Err(ClientError::Rejected(message)),
                Message::Error { code, message } => {
                    tracing::warn!("Server reported {:?}: {}", code, message);
                }
                Message::Bye => return Err(ClientError::ServerClosed),
                other => {
                    tracing::debug!("Ignoring {:?}", other.message_type());
                }
            }
        }

        self.bye().await?;
        Ok(summary)
    }
}
