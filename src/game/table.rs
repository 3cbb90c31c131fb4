//! Round state machine
//!
//! `Joining -> Dealing -> PlayerTurn(i) -> DealerTurn -> Settled`
//!
//! The table never touches the network. Every transition returns the
//! [`Effect`]s the caller must deliver, so a round driven with the same seed
//! and the same actions always produces the same effects.

use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;

use super::deck::Deck;
use super::hand::Hand;
use crate::protocol::{Card, ErrorCode, Message, PlayerAction, RoundResult};

/// Dealer draws while below this total
pub const DEALER_STANDS_ON: u8 = 17;

/// Round phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Joining,
    Dealing,
    PlayerTurn(usize),
    DealerTurn,
    Settled,
}

/// An action that does not fit the current state of the round
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IllegalAction {
    #[error("seat {0} is not at this table")]
    NoSuchSeat(usize),

    #[error("hand is already resolved")]
    Resolved,

    #[error("not your turn")]
    NotYourTurn,

    #[error("no actions accepted while {0:?}")]
    WrongPhase(Phase),
}

impl IllegalAction {
    /// Error code reported back to the offending player
    pub fn code(&self) -> ErrorCode {
        match self {
            IllegalAction::NotYourTurn => ErrorCode::NotYourTurn,
            _ => ErrorCode::IllegalAction,
        }
    }
}

/// Per-seat progress through the round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeatStatus {
    Waiting,
    Playing,
    Stood,
    Blackjack,
    Bust,
    Forfeit,
}

impl SeatStatus {
    fn is_resolved(&self) -> bool {
        matches!(
            self,
            SeatStatus::Stood | SeatStatus::Blackjack | SeatStatus::Bust | SeatStatus::Forfeit
        )
    }

    fn awaits_dealer(&self) -> bool {
        matches!(self, SeatStatus::Stood | SeatStatus::Blackjack)
    }
}

/// Final line for one seat, reported when the round settles
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatSummary {
    pub seat: usize,
    /// `None` when the player forfeited
    pub result: Option<RoundResult>,
    pub hand: Vec<Card>,
    pub total: u8,
}

/// Something the caller must deliver after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Show a player their hand and the dealer's visible cards
    Dealt {
        seat: usize,
        hand: Vec<Card>,
        dealer: Vec<Card>,
        your_turn: bool,
    },
    /// A player's hand is final
    Resolved {
        seat: usize,
        result: RoundResult,
        hand: Vec<Card>,
        dealer: Vec<Card>,
    },
    /// Every seat is resolved and the round is over
    Settled {
        dealer: Vec<Card>,
        seats: Vec<SeatSummary>,
    },
}

impl Effect {
    /// The protocol message this effect sends, and to which seat
    pub fn to_message(&self) -> Option<(usize, Message)> {
        match self {
            Effect::Dealt {
                seat,
                hand,
                dealer,
                your_turn,
            } => Some((
                *seat,
                Message::Deal {
                    hand: hand.clone(),
                    dealer: dealer.clone(),
                    your_turn: *your_turn,
                },
            )),
            Effect::Resolved {
                seat,
                result,
                hand,
                dealer,
            } => Some((
                *seat,
                Message::Outcome {
                    result: *result,
                    hand: hand.clone(),
                    dealer: dealer.clone(),
                },
            )),
            Effect::Settled { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Seat {
    hand: Hand,
    status: SeatStatus,
    result: Option<RoundResult>,
}

/// One Blackjack round
#[derive(Debug, Clone)]
pub struct Table {
    deck: Deck,
    seats: Vec<Seat>,
    dealer: Hand,
    phase: Phase,
}

impl Table {
    /// Create a table for `players` seats with a deck shuffled from `seed`
    pub fn new(players: usize, seed: u64) -> Self {
        Self::with_deck(players, Deck::seeded(seed))
    }

    pub(crate) fn with_deck(players: usize, deck: Deck) -> Self {
        let seats = (0..players)
            .map(|_| Seat {
                hand: Hand::new(),
                status: SeatStatus::Waiting,
                result: None,
            })
            .collect();

        Self {
            deck,
            seats,
            dealer: Hand::new(),
            phase: Phase::Joining,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn seat_count(&self) -> usize {
        self.seats.len()
    }

    pub fn is_settled(&self) -> bool {
        self.phase == Phase::Settled
    }

    /// Seat whose action is awaited, if any
    pub fn current_turn(&self) -> Option<usize> {
        match self.phase {
            Phase::PlayerTurn(seat) => Some(seat),
            _ => None,
        }
    }

    pub fn hand(&self, seat: usize) -> Option<&Hand> {
        self.seats.get(seat).map(|s| &s.hand)
    }

    pub fn status(&self, seat: usize) -> Option<SeatStatus> {
        self.seats.get(seat).map(|s| s.status)
    }

    pub fn dealer(&self) -> &Hand {
        &self.dealer
    }

    /// Deal two cards to every seat and the dealer, then hand the turn to the first player
    pub fn deal(&mut self) -> Result<Vec<Effect>, IllegalAction> {
        if self.phase != Phase::Joining {
            return Err(IllegalAction::WrongPhase(self.phase));
        }
        self.phase = Phase::Dealing;

        for _ in 0..2 {
            for seat in self.seats.iter_mut().filter(|s| s.status == SeatStatus::Waiting) {
                seat.hand.push(self.deck.draw());
            }
            self.dealer.push(self.deck.draw());
        }

        for seat in self.seats.iter_mut().filter(|s| s.status == SeatStatus::Waiting) {
            seat.status = if seat.hand.is_blackjack() {
                SeatStatus::Blackjack
            } else {
                SeatStatus::Playing
            };
        }

        let first = self.next_playing(0);
        let dealer = self.dealer_visible();
        let mut effects = self
            .seats
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status != SeatStatus::Forfeit)
            .map(|(i, s)| Effect::Dealt {
                seat: i,
                hand: s.hand.cards().to_vec(),
                dealer: dealer.clone(),
                your_turn: Some(i) == first,
            })
            .collect::<Vec<_>>();

        match first {
            Some(seat) => self.phase = Phase::PlayerTurn(seat),
            None => self.play_dealer(&mut effects),
        }

        Ok(effects)
    }

    /// Apply a player decision
    pub fn act(&mut self, seat: usize, action: PlayerAction) -> Result<Vec<Effect>, IllegalAction> {
        let status = self.status(seat).ok_or(IllegalAction::NoSuchSeat(seat))?;
        match self.phase {
            Phase::PlayerTurn(current) if current == seat => {}
            _ if status.is_resolved() => return Err(IllegalAction::Resolved),
            Phase::PlayerTurn(_) => return Err(IllegalAction::NotYourTurn),
            phase => return Err(IllegalAction::WrongPhase(phase)),
        }

        let mut effects = Vec::new();
        match action {
            PlayerAction::Hit => {
                let card = self.deck.draw();
                self.seats[seat].hand.push(card);

                let hand = &self.seats[seat].hand;
                if hand.is_bust() {
                    let cards = hand.cards().to_vec();
                    self.seats[seat].status = SeatStatus::Bust;
                    self.seats[seat].result = Some(RoundResult::Bust);
                    effects.push(Effect::Resolved {
                        seat,
                        result: RoundResult::Bust,
                        hand: cards,
                        dealer: self.dealer_visible(),
                    });
                    self.advance(seat, &mut effects);
                } else if hand.total() == super::hand::TWENTY_ONE {
                    let cards = hand.cards().to_vec();
                    self.seats[seat].status = SeatStatus::Stood;
                    effects.push(Effect::Dealt {
                        seat,
                        hand: cards,
                        dealer: self.dealer_visible(),
                        your_turn: false,
                    });
                    self.advance(seat, &mut effects);
                } else {
                    effects.push(Effect::Dealt {
                        seat,
                        hand: hand.cards().to_vec(),
                        dealer: self.dealer_visible(),
                        your_turn: true,
                    });
                }
            }
            PlayerAction::Stand => {
                self.seats[seat].status = SeatStatus::Stood;
                self.advance(seat, &mut effects);
            }
        }

        Ok(effects)
    }

    /// Remove a departed player from the round; the others play on
    pub fn forfeit(&mut self, seat: usize) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.is_settled() {
            return effects;
        }
        let Some(entry) = self.seats.get_mut(seat) else {
            return effects;
        };
        if entry.status == SeatStatus::Forfeit {
            return effects;
        }

        entry.status = SeatStatus::Forfeit;
        entry.result = None;

        if self.phase == Phase::PlayerTurn(seat) {
            self.advance(seat, &mut effects);
        }
        effects
    }

    /// Stand every player still to act
    pub fn stand_all(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        while let Some(seat) = self.current_turn() {
            match self.act(seat, PlayerAction::Stand) {
                Ok(more) => effects.extend(more),
                Err(_) => break,
            }
        }
        effects
    }

    fn next_playing(&self, from: usize) -> Option<usize> {
        (from..self.seats.len()).find(|&i| self.seats[i].status == SeatStatus::Playing)
    }

    fn advance(&mut self, after: usize, effects: &mut Vec<Effect>) {
        match self.next_playing(after + 1) {
            Some(next) => {
                self.phase = Phase::PlayerTurn(next);
                effects.push(Effect::Dealt {
                    seat: next,
                    hand: self.seats[next].hand.cards().to_vec(),
                    dealer: self.dealer_visible(),
                    your_turn: true,
                });
            }
            None => self.play_dealer(effects),
        }
    }

    fn play_dealer(&mut self, effects: &mut Vec<Effect>) {
        self.phase = Phase::DealerTurn;

        if self.seats.iter().any(|s| s.status.awaits_dealer()) {
            while self.dealer.total() < DEALER_STANDS_ON {
                self.dealer.push(self.deck.draw());
            }
        }

        let dealer = self.dealer.cards().to_vec();
        for (i, seat) in self.seats.iter_mut().enumerate() {
            if !seat.status.awaits_dealer() {
                continue;
            }
            let result = judge(&seat.hand, &self.dealer);
            seat.result = Some(result);
            effects.push(Effect::Resolved {
                seat: i,
                result,
                hand: seat.hand.cards().to_vec(),
                dealer: dealer.clone(),
            });
        }

        let seats = self
            .seats
            .iter()
            .enumerate()
            .map(|(i, s)| SeatSummary {
                seat: i,
                result: s.result,
                hand: s.hand.cards().to_vec(),
                total: s.hand.total(),
            })
            .collect();

        self.phase = Phase::Settled;
        effects.push(Effect::Settled { dealer, seats });
    }

    /// Dealer cards players may see: the up card until the dealer plays
    fn dealer_visible(&self) -> Vec<Card> {
        match self.phase {
            Phase::DealerTurn | Phase::Settled => self.dealer.cards().to_vec(),
            _ => self.dealer.cards().iter().take(1).copied().collect(),
        }
    }
}

/// Compare a standing hand against the dealer's final hand
fn judge(player: &Hand, dealer: &Hand) -> RoundResult {
    match (player.is_blackjack(), dealer.is_blackjack()) {
        (true, true) => RoundResult::Push,
        (true, false) => RoundResult::Blackjack,
        (false, true) => RoundResult::Lose,
        _ if dealer.is_bust() => RoundResult::Win,
        _ => match player.total().cmp(&dealer.total()) {
            Ordering::Greater => RoundResult::Win,
            Ordering::Less => RoundResult::Lose,
            Ordering::Equal => RoundResult::Push,
        },
    }
}
