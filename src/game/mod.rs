//! Blackjack rules
//!
//! Pure game logic with no I/O: a seeded [`Deck`], [`Hand`] totals and the
//! [`Table`] state machine that drives one round.

pub mod deck;
pub mod hand;
pub mod table;

pub use deck::Deck;
pub use hand::Hand;
pub use table::{Effect, IllegalAction, Phase, SeatStatus, SeatSummary, Table};
