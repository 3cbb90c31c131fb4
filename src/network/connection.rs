//! Connection handling for game sessions
//!
//! Wraps a byte stream with the frame codec:
//! - Outgoing messages are encoded and flushed as whole frames
//! - Incoming bytes accumulate until a complete frame decodes
//! - Peer departure surfaces as an error, never as a partial message

use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::{self, Decoder, Message, ProtocolError};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Peer disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection timeout")]
    Timeout,
}

impl ConnectionError {
    /// Whether the session is gone (clean close, reset or broken pipe)
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ConnectionError::Disconnected | ConnectionError::Io(_))
    }
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

/// A framed connection to a remote peer
pub struct Connection<S = TcpStream> {
    /// Remote peer address
    peer_addr: SocketAddr,
    /// The underlying stream
    stream: S,
    /// Resumable frame decoder
    decoder: Decoder,
    /// Bytes received but not yet decoded
    read_buf: BytesMut,
    /// Encoded outgoing frame
    write_buf: BytesMut,
    /// Last activity timestamp
    last_activity: Instant,
    /// Statistics
    stats: ConnectionStats,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new connection from an established stream
    pub fn new(stream: S, peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            stream,
            decoder: Decoder::new(),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(512),
            last_activity: Instant::now(),
            stats: ConnectionStats::default(),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Time since the last frame went either way
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Send a message
    pub async fn send(&mut self, message: &Message) -> ConnectionResult<()> {
        self.write_buf.clear();
        protocol::encode(message, &mut self.write_buf)?;

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.messages_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;
        self.last_activity = Instant::now();

        Ok(())
    }

    /// Receive the next complete message.
    ///
    /// Cancel safe: bytes read before cancellation stay buffered for the next call.
    pub async fn recv(&mut self) -> ConnectionResult<Message> {
        loop {
            if let Some(message) = self.decoder.decode(&mut self.read_buf)? {
                self.stats.messages_received += 1;
                self.last_activity = Instant::now();
                return Ok(message);
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                if !self.read_buf.is_empty() {
                    tracing::debug!(
                        "{} closed with {} undecoded bytes",
                        self.peer_addr,
                        self.read_buf.len()
                    );
                }
                return Err(ConnectionError::Disconnected);
            }
            self.stats.bytes_received += n as u64;
        }
    }

    /// Receive with a timeout
    pub async fn recv_timeout(&mut self, timeout: Duration) -> ConnectionResult<Message> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Shut down the write half; dropping the connection closes the socket
    pub async fn close(&mut self) -> ConnectionResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_to_vec, Card, PlayerAction, Suit};
    use tokio_test::io::Builder;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn deal() -> Message {
        Message::Deal {
            hand: vec![
                Card::new(1, Suit::Spades).unwrap(),
                Card::new(9, Suit::Hearts).unwrap(),
            ],
            dealer: vec![Card::new(10, Suit::Clubs).unwrap()],
            your_turn: true,
        }
    }

    #[tokio::test]
    async fn test_recv_across_split_reads() {
        let bytes = encode_to_vec(&deal()).unwrap();
        let mock = Builder::new()
            .read(&bytes[..2])
            .read(&bytes[2..7])
            .read(&bytes[7..])
            .build();

        let mut conn = Connection::new(mock, peer());
        assert_eq!(conn.recv().await.unwrap(), deal());
        assert_eq!(conn.stats().messages_received, 1);
    }

    #[tokio::test]
    async fn test_two_frames_in_one_read() {
        let mut bytes = encode_to_vec(&Message::Action(PlayerAction::Hit)).unwrap();
        bytes.extend(encode_to_vec(&Message::Bye).unwrap());
        let mock = Builder::new().read(&bytes).build();

        let mut conn = Connection::new(mock, peer());
        assert_eq!(conn.recv().await.unwrap(), Message::Action(PlayerAction::Hit));
        assert_eq!(conn.recv().await.unwrap(), Message::Bye);
    }

    #[tokio::test]
    async fn test_send_writes_whole_frame() {
        let message = Message::PlayerName {
            name: "Ann".to_string(),
        };
        let bytes = encode_to_vec(&message).unwrap();
        let mock = Builder::new().write(&bytes).build();

        let mut conn = Connection::new(mock, peer());
        conn.send(&message).await.unwrap();
        assert_eq!(conn.stats().bytes_sent, bytes.len() as u64);
    }

    #[tokio::test]
    async fn test_eof_is_disconnect() {
        let mock = Builder::new().build();
        let mut conn = Connection::new(mock, peer());
        let err = conn.recv().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Disconnected));
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_disconnect() {
        let bytes = encode_to_vec(&deal()).unwrap();
        let mock = Builder::new().read(&bytes[..4]).build();
        let mut conn = Connection::new(mock, peer());
        assert!(conn.recv().await.unwrap_err().is_disconnect());
    }

    #[tokio::test]
    async fn test_reset_is_disconnect() {
        let mock = Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let mut conn = Connection::new(mock, peer());
        assert!(conn.recv().await.unwrap_err().is_disconnect());
    }

    #[tokio::test]
    async fn test_unknown_tag_is_protocol_error() {
        let mock = Builder::new().read(&[0x42, 0, 0, 0, 0]).build();
        let mut conn = Connection::new(mock, peer());
        let err = conn.recv().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Protocol(ProtocolError::UnknownType(0x42))
        ));
        assert!(!err.is_disconnect());
    }
}
