//! Service discovery module
//!
//! Servers announce themselves with a periodic UDP offer; clients listen on
//! the well-known discovery port until one arrives.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

use crate::protocol::{Offer, DISCOVERY_PORT, OFFER_SIZE};

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("No server offer within {0:?}")]
    Timeout(Duration),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Already running")]
    AlreadyRunning,

    #[error("Not running")]
    NotRunning,

    #[error("Broadcast interval must be positive")]
    ZeroInterval,
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Settings for announcing a server
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// UDP port listeners wait on
    pub discovery_port: u16,
    /// Time between offers
    pub interval: Duration,
    /// Where offers are sent; the limited broadcast address by default
    pub target: IpAddr,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            discovery_port: DISCOVERY_PORT,
            interval: Duration::from_secs(1),
            target: IpAddr::V4(Ipv4Addr::BROADCAST),
        }
    }
}

impl BroadcastConfig {
    fn target_addr(&self) -> SocketAddr {
        SocketAddr::new(self.target, self.discovery_port)
    }
}

/// A server found on the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredServer {
    /// Game endpoint: the offer's sender with the advertised port
    pub addr: SocketAddr,
    /// Where the datagram came from
    pub announced_by: SocketAddr,
}

/// Periodic offer sender
pub struct Broadcaster {
    config: BroadcastConfig,
    /// Offer sent every tick
    offer: Offer,
    /// Offers successfully sent
    sent: Arc<AtomicU64>,
    /// Whether the broadcaster is running
    running: Arc<RwLock<bool>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl Broadcaster {
    /// Create a broadcaster advertising `game_port`
    pub fn new(config: BroadcastConfig, game_port: u16) -> Self {
        Self {
            config,
            offer: Offer::new(game_port),
            sent: Arc::new(AtomicU64::new(0)),
            running: Arc::new(RwLock::new(false)),
            shutdown_tx: None,
        }
    }

    /// Start sending offers
    pub async fn start(&mut self) -> DiscoveryResult<()> {
        {
            let running = self.running.read().await;
            if *running {
                return Err(DiscoveryError::AlreadyRunning);
            }
        }

        if self.config.interval.is_zero() {
            return Err(DiscoveryError::ZeroInterval);
        }

        let bind_addr = SocketAddr::from(([0, 0, 0, 0], 0));
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| DiscoveryError::Bind {
                addr: bind_addr,
                source,
            })?;
        socket.set_broadcast(true)?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let target = self.config.target_addr();
        let datagram = self.offer.encode();
        let mut ticker = tokio::time::interval(self.config.interval);
        let sent = self.sent.clone();
        let running = self.running.clone();

        tracing::info!(
            "Announcing port {} to {} every {:?}",
            self.offer.port,
            target,
            self.config.interval
        );

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match socket.send_to(&datagram, target).await {
                            Ok(_) => {
                                sent.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                tracing::warn!("Offer to {} failed: {}", target, e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            let mut running = running.write().await;
            *running = false;

            tracing::info!("Broadcaster stopped");
        });

        Ok(())
    }

    /// Stop sending offers
    pub async fn stop(&mut self) -> DiscoveryResult<()> {
        {
            let running = self.running.read().await;
            if !*running {
                return Err(DiscoveryError::NotRunning);
            }
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Number of offers sent so far
    pub fn offers_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

/// Client side of discovery: a socket bound to the discovery port
pub struct Listener {
    socket: UdpSocket,
}

impl Listener {
    /// Bind the discovery port on every interface.
    ///
    /// The port is shared, so several clients on one host can listen at once.
    pub async fn bind(port: u16) -> DiscoveryResult<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let socket =
            shared_socket(addr).map_err(|source| DiscoveryError::Bind { addr, source })?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> DiscoveryResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Wait for the first valid offer. Anything else received is discarded.
    pub async fn discover(&self, timeout: Duration) -> DiscoveryResult<DiscoveredServer> {
        let deadline = Instant::now() + timeout;
        // Room for one extra byte so oversized datagrams are seen as such.
        let mut buf = [0u8; OFFER_SIZE + 1];

        loop {
            let (len, from) =
                match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                    Ok(received) => received?,
                    Err(_) => return Err(DiscoveryError::Timeout(timeout)),
                };

            match Offer::decode(&buf[..len]) {
                Ok(offer) => {
                    let server = DiscoveredServer {
                        addr: SocketAddr::new(from.ip(), offer.port),
                        announced_by: from,
                    };
                    tracing::info!("Found server at {}", server.addr);
                    return Ok(server);
                }
                Err(e) => {
                    tracing::debug!("Discarding datagram from {}: {}", from, e);
                }
            }
        }
    }
}

fn shared_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Listen on `port` until a server offer arrives or `timeout` elapses
pub async fn discover(port: u16, timeout: Duration) -> DiscoveryResult<DiscoveredServer> {
    Listener::bind(port).await?.discover(timeout).await
}
