//! Game server
//!
//! Accepts player connections, gives each its own session worker and runs
//! the matchmaker that groups waiting players into rounds.

use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};

use super::connection::ConnectionError;
use super::lobby::{self, Lobby};
use super::session::{self, SessionCommand, SessionId, SessionInfo};
use super::ServerConfig;
use crate::protocol::{Card, PlayerAction, RoundResult};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// One player's line in a settled round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerResult {
    pub session: SessionId,
    pub name: String,
    /// `None` when the player forfeited
    pub result: Option<RoundResult>,
    pub hand: Vec<Card>,
    pub total: u8,
}

/// Events emitted by the server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Server is accepting sessions
    Started { addr: SocketAddr },
    /// A player named themselves and entered the lobby
    SessionJoined {
        session: SessionId,
        name: String,
        addr: SocketAddr,
    },
    /// A player was shown their hand
    HandDealt {
        session: SessionId,
        round: u64,
        hand: Vec<Card>,
        dealer: Vec<Card>,
    },
    /// The table is waiting on this player
    ActionRequested { session: SessionId, round: u64 },
    /// A round finished
    RoundSettled {
        round: u64,
        dealer: Vec<Card>,
        results: Vec<PlayerResult>,
    },
    /// A session ended
    SessionLeft {
        session: SessionId,
        name: Option<String>,
        reason: String,
    },
    /// Server stopped accepting sessions
    Stopped,
}

/// State shared by the accept loop, session workers, matchmaker and rounds
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    pub(crate) lobby: Lobby,
    registry: StdRwLock<HashMap<SessionId, SessionInfo>>,
    events: mpsc::Sender<ServerEvent>,
    rounds: AtomicU64,
}

impl Shared {
    fn new(config: ServerConfig, events: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            config,
            lobby: Lobby::new(),
            registry: StdRwLock::new(HashMap::new()),
            events,
            rounds: AtomicU64::new(0),
        }
    }

    /// Publish an event without ever waiting on the observer
    pub(crate) fn emit(&self, event: ServerEvent) {
        if let Err(e) = self.events.try_send(event) {
            tracing::debug!("Observer missed event: {}", e);
        }
    }

    pub(crate) fn next_round(&self) -> u64 {
        self.rounds.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn register(&self, info: SessionInfo) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.id, info);
    }

    pub(crate) fn unregister(&self, id: SessionId) -> Option<SessionInfo> {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub(crate) fn update(&self, id: SessionId, f: impl FnOnce(&mut SessionInfo)) {
        if let Some(info) = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&id)
        {
            f(info);
        }
    }

    pub(crate) fn session(&self, id: SessionId) -> Option<SessionInfo> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub(crate) fn session_name(&self, id: SessionId) -> Option<String> {
        self.session(id).and_then(|info| info.name)
    }

    fn sessions(&self) -> Vec<SessionInfo> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// Blackjack table server
pub struct Server {
    /// State shared with every task the server spawns
    shared: Arc<Shared>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Whether the server is running
    running: Arc<RwLock<bool>>,
    /// Bound address once started
    local_addr: Option<SocketAddr>,
}

impl Server {
    /// Create a new server
    pub fn new(config: ServerConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            shared: Arc::new(Shared::new(config, event_tx)),
            event_rx: Some(event_rx),
            shutdown_tx: None,
            running: Arc::new(RwLock::new(false)),
            local_addr: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Start the server
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        {
            let running = self.running.read().await;
            if *running {
                return Err(ServerError::AlreadyRunning);
            }
        }

        let bind_addr = format!("0.0.0.0:{}", self.shared.config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);
        tracing::info!(
            "Server {:?} listening on {}",
            self.shared.config.name,
            local_addr
        );

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        self.shared.emit(ServerEvent::Started { addr: local_addr });

        let shared = self.shared.clone();
        let running = self.running.clone();

        // Spawn the accept loop
        tokio::spawn(async move {
            let matchmaker = tokio::spawn(lobby::matchmaker(shared.clone()));

            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::info!("New connection from {}", addr);
                                if let Err(e) = stream.set_nodelay(true) {
                                    tracing::debug!("set_nodelay for {}: {}", addr, e);
                                }
                                tokio::spawn(session::run(shared.clone(), stream, addr));
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }

            matchmaker.abort();

            let mut running = running.write().await;
            *running = false;

            shared.emit(ServerEvent::Stopped);
        });

        Ok(local_addr)
    }

    /// Stop the server and end every session
    pub async fn stop(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if !*running {
                return Err(ServerError::NotRunning);
            }
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        for info in self.shared.sessions() {
            if let Err(e) = info.handle.try_send(SessionCommand::Shutdown) {
                tracing::debug!("Session {} already closing: {}", info.id, e);
            }
        }

        Ok(())
    }

    /// Act on a player's behalf, exactly as if they had sent the Action
    pub async fn submit_action(&self, session: SessionId, action: PlayerAction) -> ServerResult<()> {
        let info = self
            .shared
            .session(session)
            .ok_or(ServerError::UnknownSession(session))?;

        info.handle.send(SessionCommand::Inject(action)).await?;
        Ok(())
    }

    /// Snapshot of connected sessions
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.shared.sessions()
    }

    /// Address the server accepts sessions on, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
