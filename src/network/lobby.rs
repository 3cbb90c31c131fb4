//! Join-window registry and matchmaker
//!
//! Named sessions wait in the [`Lobby`]. The matchmaker sleeps until the
//! first one arrives, holds the window open for more, then moves the whole
//! waiting set into a new round.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::round;
use super::server::Shared;
use super::session::{SessionHandle, SessionId};

/// Sessions waiting for the next round, in join order
#[derive(Default)]
pub(crate) struct Lobby {
    waiting: Mutex<Vec<SessionHandle>>,
    changed: Notify,
}

impl Lobby {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn join(&self, handle: SessionHandle) {
        {
            let mut waiting = self.waiting.lock().unwrap_or_else(PoisonError::into_inner);
            if waiting.iter().any(|h| h.id() == handle.id()) {
                return;
            }
            waiting.push(handle);
        }
        self.changed.notify_one();
    }

    /// Remove a session; true if it was waiting
    pub(crate) fn leave(&self, id: SessionId) -> bool {
        let removed = {
            let mut waiting = self.waiting.lock().unwrap_or_else(PoisonError::into_inner);
            let before = waiting.len();
            waiting.retain(|h| h.id() != id);
            waiting.len() != before
        };
        if removed {
            self.changed.notify_one();
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take up to `max` sessions, oldest first
    pub(crate) fn drain(&self, max: usize) -> Vec<SessionHandle> {
        let mut waiting = self.waiting.lock().unwrap_or_else(PoisonError::into_inner);
        let take = waiting.len().min(max);
        waiting.drain(..take).collect()
    }

    /// Resolve once somebody is waiting
    async fn occupied(&self) {
        loop {
            if !self.is_empty() {
                return;
            }
            self.changed.notified().await;
        }
    }
}

/// Form rounds for as long as the server runs
pub(crate) async fn matchmaker(shared: Arc<Shared>) {
    let window = shared.config.join_window;
    let max_players = shared.config.max_players.max(1);

    loop {
        shared.lobby.occupied().await;

        let closes = Instant::now() + window;
        tracing::debug!("Join window open for {:?}", window);

        while shared.lobby.len() < max_players && !shared.lobby.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep_until(closes) => break,
                _ = shared.lobby.changed.notified() => {}
            }
        }

        let players = shared.lobby.drain(max_players);
        if players.is_empty() {
            tracing::debug!("Join window closed with nobody waiting");
            continue;
        }

        let id = shared.next_round();
        tracing::info!("Round {} forming with {} player(s)", id, players.len());
        tokio::spawn(round::run(shared.clone(), id, players));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle() -> SessionHandle {
        let (tx, _rx) = mpsc::channel(1);
        SessionHandle::new(SessionId::new(), tx)
    }

    #[test]
    fn test_join_is_idempotent() {
        let lobby = Lobby::new();
        let h = handle();
        lobby.join(h.clone());
        lobby.join(h);
        assert_eq!(lobby.len(), 1);
    }

    #[test]
    fn test_drain_keeps_join_order() {
        let lobby = Lobby::new();
        let handles = (0..3).map(|_| handle()).collect::<Vec<_>>();
        for h in &handles {
            lobby.join(h.clone());
        }

        let drained = lobby.drain(2);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id(), handles[0].id());
        assert_eq!(drained[1].id(), handles[1].id());
        assert_eq!(lobby.len(), 1);
    }

    #[test]
    fn test_leave_removes_waiting_session() {
        let lobby = Lobby::new();
        let h = handle();
        lobby.join(h.clone());
        assert!(lobby.leave(h.id()));
        assert!(!lobby.leave(h.id()));
        assert!(lobby.is_empty());
    }

    #[tokio::test]
    async fn test_occupied_wakes_on_join() {
        let lobby = Arc::new(Lobby::new());
        let waiter = {
            let lobby = lobby.clone();
            tokio::spawn(async move { lobby.occupied().await })
        };

        tokio::task::yield_now().await;
        lobby.join(handle());

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
