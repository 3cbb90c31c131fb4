//! Round task
//!
//! Owns one [`Table`] and the seats drawn from the lobby. Player actions
//! arrive on a bounded channel through each seat's [`RoundLink`]; table
//! effects go back out through the seat's session queue without waiting,
//! so one stalled player cannot hold up the others.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::connection::ConnectionError;
use super::server::{PlayerResult, ServerEvent, Shared};
use super::session::{SessionCommand, SessionHandle};
use crate::game::{Effect, Table};
use crate::protocol::{ErrorCode, Message, PlayerAction};

/// Depth of the round input queue
const INPUT_QUEUE: usize = 64;

#[derive(Debug)]
pub(crate) enum RoundInput {
    Action { seat: usize, action: PlayerAction },
    Left { seat: usize },
}

/// A session's seat at a round; dropping it forfeits the seat
#[derive(Debug)]
pub(crate) struct RoundLink {
    round: u64,
    seat: usize,
    inputs: mpsc::Sender<RoundInput>,
}

impl RoundLink {
    pub(crate) fn round(&self) -> u64 {
        self.round
    }

    /// Pass an action to the table; false once the round is gone
    pub(crate) async fn submit(&self, action: PlayerAction) -> bool {
        self.inputs
            .send(RoundInput::Action {
                seat: self.seat,
                action,
            })
            .await
            .is_ok()
    }
}

impl Drop for RoundLink {
    fn drop(&mut self) {
        // A failed delivery forfeits the seat as well.
        if let Err(e) = self.inputs.try_send(RoundInput::Left { seat: self.seat }) {
            tracing::debug!(
                "Round {} not told that seat {} left: {}",
                self.round,
                self.seat,
                e
            );
        }
    }
}

/// Unseat a session, waiting for room in its queue if it is backed up
pub(crate) fn release_seat(round: u64, handle: &SessionHandle) {
    match handle.try_send(SessionCommand::Release(round)) {
        Ok(()) => {}
        Err(ConnectionError::Timeout) => {
            tracing::warn!("Round {}: queue full, releasing {} later", round, handle.id());
            let handle = handle.clone();
            tokio::spawn(async move {
                if let Err(e) = handle.send(SessionCommand::Release(round)).await {
                    tracing::debug!("Round {}: {} gone before release: {}", round, handle.id(), e);
                }
            });
        }
        Err(e) => {
            tracing::debug!("Round {}: {} gone before release: {}", round, handle.id(), e);
        }
    }
}

/// Play one round with `players`, then send everyone still connected back to the lobby
pub(crate) async fn run(shared: Arc<Shared>, id: u64, players: Vec<SessionHandle>) {
    let seed = match shared.config.deck_seed {
        Some(seed) => seed.wrapping_add(id),
        None => rand::random(),
    };
    tracing::debug!("Round {} seed {}", id, seed);

    let (inputs_tx, inputs) = mpsc::channel(INPUT_QUEUE);
    let mut round = Round {
        id,
        shared: shared.clone(),
        table: Table::new(players.len(), seed),
        names: players
            .iter()
            .map(|h| {
                shared
                    .session_name(h.id())
                    .unwrap_or_else(|| h.id().to_string())
            })
            .collect(),
        seats: players,
        pending: VecDeque::new(),
    };

    for (seat, handle) in round.seats.iter().enumerate() {
        let link = RoundLink {
            round: id,
            seat,
            inputs: inputs_tx.clone(),
        };
        if let Err(e) = handle.try_send(SessionCommand::Attach(link)) {
            tracing::info!("Round {} seat {} gone before the deal: {}", id, seat, e);
            round.pending.push_back(seat);
        }
    }
    drop(inputs_tx);

    round.play(inputs).await;
}

struct Round {
    id: u64,
    shared: Arc<Shared>,
    table: Table,
    seats: Vec<SessionHandle>,
    names: Vec<String>,
    /// Seats found unreachable, waiting to be forfeited
    pending: VecDeque<usize>,
}

impl Round {
    async fn play(&mut self, mut inputs: mpsc::Receiver<RoundInput>) {
        self.apply_forfeits();
        match self.table.deal() {
            Ok(effects) => self.dispatch(effects),
            Err(e) => {
                tracing::error!("Round {} could not deal: {}", self.id, e);
                return;
            }
        }

        let turn_timeout = self.shared.config.turn_timeout;
        let deadline = Instant::now() + self.shared.config.round_deadline;
        let mut turn = self.table.current_turn();
        let mut turn_deadline = Instant::now() + turn_timeout;

        while !self.table.is_settled() {
            if self.table.current_turn() != turn {
                turn = self.table.current_turn();
                turn_deadline = Instant::now() + turn_timeout;
            }

            tokio::select! {
                input = inputs.recv() => match input {
                    Some(RoundInput::Action { seat, action }) => {
                        if self.act(seat, action) {
                            turn_deadline = Instant::now() + turn_timeout;
                        }
                    }
                    Some(RoundInput::Left { seat }) => {
                        tracing::info!("Round {}: {} left the table", self.id, self.names[seat]);
                        self.pending.push_back(seat);
                    }
                    None => {
                        tracing::info!("Round {}: every player left", self.id);
                        self.pending.extend(0..self.seats.len());
                    }
                },
                _ = tokio::time::sleep_until(turn_deadline), if turn.is_some() => {
                    if let Some(seat) = turn {
                        tracing::info!("Round {}: {} timed out, standing", self.id, self.names[seat]);
                        self.act(seat, PlayerAction::Stand);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("Round {} hit its deadline, standing everyone", self.id);
                    let effects = self.table.stand_all();
                    self.dispatch(effects);
                }
            }

            self.apply_forfeits();
        }

        self.finish(inputs).await;
    }

    /// Apply an action; true when the table accepted it
    fn act(&mut self, seat: usize, action: PlayerAction) -> bool {
        tracing::debug!("Round {}: {} chose {}", self.id, self.names[seat], action);
        match self.table.act(seat, action) {
            Ok(effects) => {
                self.dispatch(effects);
                true
            }
            Err(e) => {
                tracing::debug!("Round {}: rejected {} from seat {}: {}", self.id, action, seat, e);
                self.deliver(seat, Message::error(e.code()));
                false
            }
        }
    }

    fn apply_forfeits(&mut self) {
        while let Some(seat) = self.pending.pop_front() {
            let effects = self.table.forfeit(seat);
            self.dispatch(effects);
        }
    }

    fn dispatch(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match &effect {
                Effect::Dealt {
                    seat,
                    hand,
                    dealer,
                    your_turn,
                } => {
                    let session = self.seats[*seat].id();
                    self.shared.emit(ServerEvent::HandDealt {
                        session,
                        round: self.id,
                        hand: hand.clone(),
                        dealer: dealer.clone(),
                    });
                    if *your_turn {
                        self.shared.emit(ServerEvent::ActionRequested {
                            session,
                            round: self.id,
                        });
                    }
                }
                Effect::Resolved { seat, result, .. } => {
                    tracing::debug!("Round {}: {} {:?}", self.id, self.names[*seat], result);
                }
                Effect::Settled { dealer, seats } => {
                    let results = seats
                        .iter()
                        .map(|s| PlayerResult {
                            session: self.seats[s.seat].id(),
                            name: self.names[s.seat].clone(),
                            result: s.result,
                            hand: s.hand.clone(),
                            total: s.total,
                        })
                        .collect();
                    self.shared.emit(ServerEvent::RoundSettled {
                        round: self.id,
                        dealer: dealer.clone(),
                        results,
                    });
                }
            }

            if let Some((seat, message)) = effect.to_message() {
                self.deliver(seat, message);
            }
        }
    }

    fn deliver(&mut self, seat: usize, message: Message) {
        if let Err(e) = self.seats[seat].try_send(SessionCommand::Deliver(message)) {
            tracing::debug!("Round {}: seat {} unreachable: {}", self.id, seat, e);
            self.pending.push_back(seat);
        }
    }

    /// Release every seat and answer anything still queued
    async fn finish(&mut self, mut inputs: mpsc::Receiver<RoundInput>) {
        tracing::info!("Round {} settled", self.id);

        for handle in &self.seats {
            release_seat(self.id, handle);
        }

        inputs.close();
        while let Some(input) = inputs.recv().await {
            if let RoundInput::Action { seat, action } = input {
                tracing::debug!("Round {}: {} from seat {} after settlement", self.id, action, seat);
                let reply = SessionCommand::Deliver(Message::error(ErrorCode::IllegalAction));
                if let Err(e) = self.seats[seat].try_send(reply) {
                    tracing::debug!("Round {}: seat {} missed its rejection: {}", self.id, seat, e);
                }
            }
        }
    }
}
