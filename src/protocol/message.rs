//! Protocol message definitions
//!
//! Defines every message exchanged on a game session, plus the card type
//! that Deal and Outcome payloads carry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Card suits, in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Suit {
    Clubs = 0,
    Diamonds = 1,
    Hearts = 2,
    Spades = 3,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Clubs, Suit::Diamonds, Suit::Hearts, Suit::Spades];

    fn symbol(&self) -> char {
        match self {
            Suit::Clubs => '♣',
            Suit::Diamonds => '♦',
            Suit::Hearts => '♥',
            Suit::Spades => '♠',
        }
    }
}

impl TryFrom<u8> for Suit {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Suit::Clubs),
            1 => Ok(Suit::Diamonds),
            2 => Ok(Suit::Hearts),
            3 => Ok(Suit::Spades),
            other => Err(other),
        }
    }
}

/// A playing card: rank 1 (ace) through 13 (king) plus a suit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    rank: u8,
    suit: Suit,
}

impl Card {
    pub const MIN_RANK: u8 = 1;
    pub const MAX_RANK: u8 = 13;

    /// Build a card, rejecting ranks outside 1..=13
    pub fn new(rank: u8, suit: Suit) -> Option<Self> {
        (Self::MIN_RANK..=Self::MAX_RANK)
            .contains(&rank)
            .then_some(Self { rank, suit })
    }

    pub fn rank(&self) -> u8 {
        self.rank
    }

    pub fn suit(&self) -> Suit {
        self.suit
    }

    pub fn is_ace(&self) -> bool {
        self.rank == 1
    }

    /// Blackjack value with aces counted low; face cards are worth 10
    pub fn value(&self) -> u8 {
        self.rank.min(10)
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rank = match self.rank {
            1 => "A".to_string(),
            11 => "J".to_string(),
            12 => "Q".to_string(),
            13 => "K".to_string(),
            n => n.to_string(),
        };
        write!(f, "{}{}", rank, self.suit.symbol())
    }
}

/// Message type tags as they appear in the first byte of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Welcome = 0,
    PlayerName = 1,
    Deal = 2,
    Action = 3,
    Outcome = 4,
    Error = 5,
    Bye = 6,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(MessageType::Welcome),
            1 => Ok(MessageType::PlayerName),
            2 => Ok(MessageType::Deal),
            3 => Ok(MessageType::Action),
            4 => Ok(MessageType::Outcome),
            5 => Ok(MessageType::Error),
            6 => Ok(MessageType::Bye),
            other => Err(other),
        }
    }
}

/// A player decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PlayerAction {
    Hit = 0,
    Stand = 1,
}

impl TryFrom<u8> for PlayerAction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(PlayerAction::Hit),
            1 => Ok(PlayerAction::Stand),
            other => Err(other),
        }
    }
}

impl fmt::Display for PlayerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerAction::Hit => f.write_str("hit"),
            PlayerAction::Stand => f.write_str("stand"),
        }
    }
}

/// Final result of one player's hand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RoundResult {
    Win = 0,
    Lose = 1,
    Push = 2,
    Blackjack = 3,
    Bust = 4,
}

impl RoundResult {
    /// Whether the player came out ahead
    pub fn is_win(&self) -> bool {
        matches!(self, RoundResult::Win | RoundResult::Blackjack)
    }

    /// Whether the player lost the hand
    pub fn is_loss(&self) -> bool {
        matches!(self, RoundResult::Lose | RoundResult::Bust)
    }
}

impl TryFrom<u8> for RoundResult {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(RoundResult::Win),
            1 => Ok(RoundResult::Lose),
            2 => Ok(RoundResult::Push),
            3 => Ok(RoundResult::Blackjack),
            4 => Ok(RoundResult::Bust),
            other => Err(other),
        }
    }
}

/// Error codes for the Error message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorCode {
    IllegalAction = 1,
    NotYourTurn = 2,
    InvalidName = 3,
    UnexpectedMessage = 4,
}

impl ErrorCode {
    /// Default human-readable text sent alongside the code
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::IllegalAction => "illegal action",
            ErrorCode::NotYourTurn => "not your turn",
            ErrorCode::InvalidName => "invalid player name",
            ErrorCode::UnexpectedMessage => "unexpected message",
        }
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            1 => Ok(ErrorCode::IllegalAction),
            2 => Ok(ErrorCode::NotYourTurn),
            3 => Ok(ErrorCode::InvalidName),
            4 => Ok(ErrorCode::UnexpectedMessage),
            other => Err(other),
        }
    }
}

/// All messages exchanged on a game session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Server greeting, sent as soon as a connection is accepted
    Welcome { server_name: String },

    /// Client introduces itself
    PlayerName { name: String },

    /// Current view of the table for one player
    Deal {
        /// The player's own hand
        hand: Vec<Card>,
        /// Dealer cards visible to players
        dealer: Vec<Card>,
        /// Set when the server is waiting for this player's Action
        your_turn: bool,
    },

    /// Player decision
    Action(PlayerAction),

    /// Final result for the player's hand
    Outcome {
        result: RoundResult,
        hand: Vec<Card>,
        dealer: Vec<Card>,
    },

    /// Rejection of the last message; the session stays open
    Error { code: ErrorCode, message: String },

    /// Graceful goodbye from either side
    Bye,
}

impl Message {
    /// Get the message type tag
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Welcome { .. } => MessageType::Welcome,
            Message::PlayerName { .. } => MessageType::PlayerName,
            Message::Deal { .. } => MessageType::Deal,
            Message::Action(_) => MessageType::Action,
            Message::Outcome { .. } => MessageType::Outcome,
            Message::Error { .. } => MessageType::Error,
            Message::Bye => MessageType::Bye,
        }
    }

    /// Build an Error message carrying the code's default text
    pub fn error(code: ErrorCode) -> Self {
        Message::Error {
            code,
            message: code.description().to_string(),
        }
    }
}
