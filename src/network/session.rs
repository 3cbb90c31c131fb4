//! Per-session worker
//!
//! Every accepted connection gets its own task that owns the [`Connection`].
//! Everything else talks to the session through its [`SessionHandle`], so a
//! stalled socket only ever stalls its own worker.

use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use uuid::Uuid;

use super::connection::{Connection, ConnectionError, ConnectionResult};
use super::round::RoundLink;
use super::server::{ServerEvent, Shared};
use super::validate_name;
use crate::protocol::{ErrorCode, Message, PlayerAction};

/// Depth of each session's command queue
const COMMAND_QUEUE: usize = 256;

/// Unique identifier of a session for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Connected, waiting for PlayerName
    Naming,
    /// In the lobby for the next round
    Waiting,
    /// Seated at a round
    Playing { round: u64 },
    /// Round finished; sits out until the player sends PlayerName again
    Idle,
}

/// Registry entry for a connected session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub addr: SocketAddr,
    pub name: Option<String>,
    pub state: SessionState,
    pub(crate) handle: SessionHandle,
}

/// Requests delivered to a session worker
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Write this message to the player
    Deliver(Message),
    /// Seat the session at a round
    Attach(RoundLink),
    /// The round with this id is over; unseat the session
    Release(u64),
    /// Act on the player's behalf
    Inject(PlayerAction),
    /// Say Bye and end the session
    Shutdown,
}

/// A handle for reaching a session worker
#[derive(Clone, Debug)]
pub(crate) struct SessionHandle {
    id: SessionId,
    sender: mpsc::Sender<SessionCommand>,
    connected: Arc<AtomicBool>,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, sender: mpsc::Sender<SessionCommand>) -> Self {
        Self {
            id,
            sender,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    /// Queue a command, waiting for room
    pub(crate) async fn send(&self, command: SessionCommand) -> ConnectionResult<()> {
        if !self.is_connected() {
            return Err(ConnectionError::Disconnected);
        }

        self.sender
            .send(command)
            .await
            .map_err(|_| ConnectionError::Disconnected)
    }

    /// Queue a command without waiting; a full queue counts as a stalled session
    pub(crate) fn try_send(&self, command: SessionCommand) -> ConnectionResult<()> {
        if !self.is_connected() {
            return Err(ConnectionError::Disconnected);
        }

        match self.sender.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Session {} is not draining its queue", self.id);
                Err(ConnectionError::Timeout)
            }
            Err(TrySendError::Closed(_)) => Err(ConnectionError::Disconnected),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Why a worker finished without error
enum Exit {
    Bye,
    Shutdown,
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Bye => write!(f, "bye"),
            Exit::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Tears the session down however the worker exits
struct SessionGuard {
    shared: Arc<Shared>,
    handle: SessionHandle,
    reason: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let id = self.handle.id();
        self.handle.mark_disconnected();
        self.shared.lobby.leave(id);

        let name = self.shared.unregister(id).and_then(|info| info.name);
        tracing::info!(
            "Session {} ({}) left: {}",
            id,
            name.as_deref().unwrap_or("unnamed"),
            self.reason
        );

        self.shared.emit(ServerEvent::SessionLeft {
            session: id,
            name,
            reason: std::mem::take(&mut self.reason),
        });
    }
}

/// Run one session from accept to teardown
pub(crate) async fn run(shared: Arc<Shared>, stream: TcpStream, addr: SocketAddr) {
    let id = SessionId::new();
    let (sender, commands) = mpsc::channel(COMMAND_QUEUE);
    let handle = SessionHandle::new(id, sender);

    shared.register(SessionInfo {
        id,
        addr,
        name: None,
        state: SessionState::Naming,
        handle: handle.clone(),
    });

    let mut guard = SessionGuard {
        shared: shared.clone(),
        handle: handle.clone(),
        reason: "worker aborted".to_string(),
    };

    let mut worker = Worker {
        id,
        shared,
        handle,
        conn: Connection::new(stream, addr),
        commands,
        round: None,
        name: None,
        ready: false,
    };

    guard.reason = match worker.run().await {
        Ok(exit) => exit.to_string(),
        Err(e) if e.is_disconnect() => {
            tracing::debug!("Session {} disconnected: {}", id, e);
            "disconnected".to_string()
        }
        Err(e) => {
            tracing::warn!("Session {} ({}) terminated: {}", id, addr, e);
            e.to_string()
        }
    };

    if let Err(e) = worker.conn.close().await {
        tracing::debug!("Session {} close: {}", id, e);
    }
}

struct Worker {
    id: SessionId,
    shared: Arc<Shared>,
    handle: SessionHandle,
    conn: Connection,
    commands: mpsc::Receiver<SessionCommand>,
    round: Option<RoundLink>,
    name: Option<String>,
    /// Asked for another round while still seated
    ready: bool,
}

impl Worker {
    async fn run(&mut self) -> ConnectionResult<Exit> {
        self.conn
            .send(&Message::Welcome {
                server_name: self.shared.config.name.clone(),
            })
            .await?;

        let naming_deadline = Instant::now() + self.shared.config.name_timeout;

        loop {
            // Commands first so a queued Release lands before the next frame is read.
            let exit = tokio::select! {
                biased;
                Some(command) = self.commands.recv() => self.on_command(command).await?,
                inbound = self.conn.recv() => self.on_message(inbound?).await?,
                _ = tokio::time::sleep_until(naming_deadline), if self.name.is_none() => {
                    return Err(ConnectionError::Timeout);
                }
            };

            if let Some(exit) = exit {
                return Ok(exit);
            }
        }
    }

    async fn on_message(&mut self, message: Message) -> ConnectionResult<Option<Exit>> {
        match message {
            Message::Bye => return Ok(Some(Exit::Bye)),
            Message::PlayerName { name } if self.name.is_none() => self.accept_name(&name).await?,
            Message::PlayerName { name } => self.rejoin(&name).await?,
            Message::Action(action) if self.name.is_some() => self.forward(action).await?,
            other => {
                tracing::warn!(
                    "Session {} sent unexpected {:?}",
                    self.id,
                    other.message_type()
                );
                self.conn
                    .send(&Message::error(ErrorCode::UnexpectedMessage))
                    .await?;
            }
        }
        Ok(None)
    }

    async fn on_command(&mut self, command: SessionCommand) -> ConnectionResult<Option<Exit>> {
        match command {
            SessionCommand::Deliver(message) => self.conn.send(&message).await?,
            SessionCommand::Attach(link) => {
                let round = link.round();
                self.shared
                    .update(self.id, |info| info.state = SessionState::Playing { round });
                self.round = Some(link);
            }
            SessionCommand::Release(round) => {
                if self.round.as_ref().map(RoundLink::round) == Some(round) {
                    self.release();
                } else {
                    tracing::debug!("Session {} ignoring release from round {}", self.id, round);
                }
            }
            SessionCommand::Inject(action) if self.name.is_some() => self.forward(action).await?,
            SessionCommand::Inject(action) => {
                tracing::warn!("Dropping {} for unnamed session {}", action, self.id);
            }
            SessionCommand::Shutdown => {
                if let Err(e) = self.conn.send(&Message::Bye).await {
                    tracing::debug!("Session {} missed Bye: {}", self.id, e);
                }
                return Ok(Some(Exit::Shutdown));
            }
        }
        Ok(None)
    }

    async fn accept_name(&mut self, raw: &str) -> ConnectionResult<()> {
        let Some(name) = validate_name(raw).map(str::to_string) else {
            tracing::debug!("Session {} offered invalid name {:?}", self.id, raw);
            return self.conn.send(&Message::error(ErrorCode::InvalidName)).await;
        };

        tracing::info!("{} joined as {:?}", self.conn.peer_addr(), name);
        self.shared.update(self.id, |info| {
            info.name = Some(name.clone());
            info.state = SessionState::Waiting;
        });
        self.shared.emit(ServerEvent::SessionJoined {
            session: self.id,
            name: name.clone(),
            addr: self.conn.peer_addr(),
        });

        self.name = Some(name);
        self.shared.lobby.join(self.handle.clone());
        Ok(())
    }

    /// A named player asks for the next round, possibly under a new name
    async fn rejoin(&mut self, raw: &str) -> ConnectionResult<()> {
        let Some(name) = validate_name(raw).map(str::to_string) else {
            tracing::debug!("Session {} offered invalid name {:?}", self.id, raw);
            return self.conn.send(&Message::error(ErrorCode::InvalidName)).await;
        };

        if self.name.as_deref() != Some(name.as_str()) {
            tracing::info!("Session {} renamed to {:?}", self.id, name);
            self.shared
                .update(self.id, |info| info.name = Some(name.clone()));
            self.name = Some(name);
        }

        if self.round.is_some() {
            self.ready = true;
        } else {
            self.wait_for_round();
        }
        Ok(())
    }

    /// Hand an action to the round, or reject it when no round will take it
    async fn forward(&mut self, action: PlayerAction) -> ConnectionResult<()> {
        let accepted = match &self.round {
            Some(link) => link.submit(action).await,
            None => false,
        };

        if !accepted {
            if self.round.is_some() {
                tracing::warn!("Round for session {} vanished without release", self.id);
                self.release();
            }
            self.conn
                .send(&Message::error(ErrorCode::IllegalAction))
                .await?;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.round = None;
        if std::mem::take(&mut self.ready) {
            self.wait_for_round();
        } else {
            self.shared
                .update(self.id, |info| info.state = SessionState::Idle);
        }
    }

    fn wait_for_round(&mut self) {
        self.shared
            .update(self.id, |info| info.state = SessionState::Waiting);
        self.shared.lobby.join(self.handle.clone());
    }
}
