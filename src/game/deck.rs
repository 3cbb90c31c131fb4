//! Seeded card shoe

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::protocol::{Card, Suit};

/// Number of cards in a fresh deck
pub const DECK_SIZE: usize = 52;

/// A seeded, shuffled shoe.
///
/// Cards come off the top in shuffle order. When the shoe runs dry a fresh
/// deck is shuffled from the same generator, so the whole sequence of draws
/// is a pure function of the seed.
#[derive(Debug, Clone)]
pub struct Deck {
    cards: Vec<Card>,
    rng: SmallRng,
}

impl Deck {
    /// Creates a deck shuffled from `seed`.
    pub fn seeded(seed: u64) -> Self {
        let mut deck = Self {
            cards: Vec::with_capacity(DECK_SIZE),
            rng: SmallRng::seed_from_u64(seed),
        };
        deck.refill();
        deck
    }

    /// A deck that yields `cards` in order before falling back to shuffled decks.
    #[cfg(test)]
    pub(crate) fn stacked(mut cards: Vec<Card>) -> Self {
        cards.reverse();
        Self {
            cards,
            rng: SmallRng::seed_from_u64(0),
        }
    }

    /// Cards left before the next reshuffle.
    pub fn remaining(&self) -> usize {
        self.cards.len()
    }

    /// Draws the top card.
    pub fn draw(&mut self) -> Card {
        if self.cards.is_empty() {
            self.refill();
        }
        match self.cards.pop() {
            Some(card) => card,
            None => unreachable!("refill always yields a full deck"),
        }
    }

    fn refill(&mut self) {
        self.cards.clear();
        self.cards.extend(
            Suit::ALL
                .iter()
                .flat_map(|&suit| (Card::MIN_RANK..=Card::MAX_RANK).filter_map(move |rank| Card::new(rank, suit))),
        );
        self.cards.shuffle(&mut self.rng);
    }
}

impl Iterator for Deck {
    type Item = Card;
    fn next(&mut self) -> Option<Self::Item> {
        Some(self.draw())
    }
}
