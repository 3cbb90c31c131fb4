//! Hand totals
//!
//! Aces count 1 or 11, face cards 10.

use crate::protocol::Card;
use serde::Serialize;

/// Highest total that does not bust
pub const TWENTY_ONE: u8 = 21;

/// The cards one player (or the dealer) holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Hand(Vec<Card>);

impl Hand {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, card: Card) {
        self.0.push(card);
    }

    pub fn cards(&self) -> &[Card] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Best total: one ace counts 11 when that does not bust the hand.
    pub fn total(&self) -> u8 {
        let hard = self.0.iter().map(Card::value).sum::<u8>();
        if self.0.iter().any(Card::is_ace) && hard + 10 <= TWENTY_ONE {
            hard + 10
        } else {
            hard
        }
    }

    /// Two-card 21.
    pub fn is_blackjack(&self) -> bool {
        self.0.len() == 2 && self.total() == TWENTY_ONE
    }

    pub fn is_bust(&self) -> bool {
        self.total() > TWENTY_ONE
    }
}

impl From<Vec<Card>> for Hand {
    fn from(cards: Vec<Card>) -> Self {
        Self(cards)
    }
}

impl From<Hand> for Vec<Card> {
    fn from(hand: Hand) -> Self {
        hand.0
    }
}
