//! Protocol codec for encoding/decoding session frames
//!
//! Handles framing and the fixed per-type payload layouts.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::{Card, ErrorCode, Message, MessageType, PlayerAction, RoundResult, Suit};

/// Maximum payload size (64 KiB)
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Header size: type(1) + length(4) = 5 bytes
pub const HEADER_SIZE: usize = 5;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Incomplete frame: {needed} more bytes needed")]
    Incomplete { needed: usize },

    #[error("Unknown message type: {0:#04x}")]
    UnknownType(u8),

    #[error("Payload too large: {0} bytes (max: {1})")]
    PayloadTooLarge(usize, usize),

    #[error("Malformed {kind:?} payload: {reason}")]
    Malformed { kind: MessageType, reason: String },
}

impl ProtocolError {
    /// True when the input was a valid prefix and more bytes will complete it
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ProtocolError::Incomplete { .. })
    }

    fn malformed(kind: MessageType, reason: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Encode a message into a buffer as one complete frame
pub fn encode(message: &Message, buf: &mut BytesMut) -> ProtocolResult<()> {
    let kind = message.message_type();
    let mut payload = BytesMut::new();

    match message {
        Message::Welcome { server_name } => payload.put_slice(server_name.as_bytes()),
        Message::PlayerName { name } => payload.put_slice(name.as_bytes()),
        Message::Deal {
            hand,
            dealer,
            your_turn,
        } => {
            put_cards(kind, hand, &mut payload)?;
            put_cards(kind, dealer, &mut payload)?;
            payload.put_u8(u8::from(*your_turn));
        }
        Message::Action(action) => payload.put_u8(*action as u8),
        Message::Outcome {
            result,
            hand,
            dealer,
        } => {
            payload.put_u8(*result as u8);
            put_cards(kind, hand, &mut payload)?;
            put_cards(kind, dealer, &mut payload)?;
        }
        Message::Error { code, message } => {
            payload.put_u8(*code as u8);
            payload.put_slice(message.as_bytes());
        }
        Message::Bye => {}
    }

    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(payload.len(), MAX_PAYLOAD_SIZE));
    }

    buf.reserve(HEADER_SIZE + payload.len());
    buf.put_u8(kind as u8);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(())
}

/// Encode a message into a freshly allocated frame
pub fn encode_to_vec(message: &Message) -> ProtocolResult<Vec<u8>> {
    let mut buf = BytesMut::new();
    encode(message, &mut buf)?;
    Ok(buf.to_vec())
}

/// Decode one frame from the start of `bytes`
///
/// Returns the message and the number of bytes it occupied. A valid but
/// unfinished prefix yields [`ProtocolError::Incomplete`]; the header is
/// validated as soon as it is available, before the payload arrives.
pub fn decode(bytes: &[u8]) -> ProtocolResult<(Message, usize)> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::Incomplete {
            needed: HEADER_SIZE - bytes.len(),
        });
    }

    let (kind, length) = parse_header(&bytes[..HEADER_SIZE])?;
    let total = HEADER_SIZE + length;
    if bytes.len() < total {
        return Err(ProtocolError::Incomplete {
            needed: total - bytes.len(),
        });
    }

    let message = decode_payload(kind, &bytes[HEADER_SIZE..total])?;
    Ok((message, total))
}

fn parse_header(header: &[u8]) -> ProtocolResult<(MessageType, usize)> {
    let kind = MessageType::try_from(header[0]).map_err(ProtocolError::UnknownType)?;
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

    if length > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(length, MAX_PAYLOAD_SIZE));
    }

    Ok((kind, length))
}

fn decode_payload(kind: MessageType, payload: &[u8]) -> ProtocolResult<Message> {
    let mut reader = PayloadReader { kind, buf: payload };

    let message = match kind {
        MessageType::Welcome => Message::Welcome {
            server_name: reader.rest_utf8()?,
        },
        MessageType::PlayerName => Message::PlayerName {
            name: reader.rest_utf8()?,
        },
        MessageType::Deal => {
            let hand = reader.cards()?;
            let dealer = reader.cards()?;
            let your_turn = match reader.u8()? {
                0 => false,
                1 => true,
                other => {
                    return Err(ProtocolError::malformed(kind, format!("bad flags {other:#04x}")))
                }
            };
            Message::Deal {
                hand,
                dealer,
                your_turn,
            }
        }
        MessageType::Action => {
            let byte = reader.u8()?;
            let action = PlayerAction::try_from(byte)
                .map_err(|b| ProtocolError::malformed(kind, format!("unknown action {b}")))?;
            Message::Action(action)
        }
        MessageType::Outcome => {
            let byte = reader.u8()?;
            let result = RoundResult::try_from(byte)
                .map_err(|b| ProtocolError::malformed(kind, format!("unknown result {b}")))?;
            let hand = reader.cards()?;
            let dealer = reader.cards()?;
            Message::Outcome {
                result,
                hand,
                dealer,
            }
        }
        MessageType::Error => {
            let byte = reader.u8()?;
            let code = ErrorCode::try_from(byte)
                .map_err(|b| ProtocolError::malformed(kind, format!("unknown error code {b}")))?;
            Message::Error {
                code,
                message: reader.rest_utf8()?,
            }
        }
        MessageType::Bye => Message::Bye,
    };

    reader.finish()?;
    Ok(message)
}

fn put_cards(kind: MessageType, cards: &[Card], buf: &mut BytesMut) -> ProtocolResult<()> {
    let count = u8::try_from(cards.len())
        .map_err(|_| ProtocolError::malformed(kind, format!("{} cards in one hand", cards.len())))?;
    buf.put_u8(count);
    for card in cards {
        buf.put_u8(card.rank());
        buf.put_u8(card.suit() as u8);
    }
    Ok(())
}

/// Bounds-checked cursor over a single payload
struct PayloadReader<'a> {
    kind: MessageType,
    buf: &'a [u8],
}

impl PayloadReader<'_> {
    fn u8(&mut self) -> ProtocolResult<u8> {
        if !self.buf.has_remaining() {
            return Err(ProtocolError::malformed(self.kind, "payload truncated"));
        }
        Ok(self.buf.get_u8())
    }

    fn cards(&mut self) -> ProtocolResult<Vec<Card>> {
        let count = self.u8()? as usize;
        if self.buf.remaining() < count * 2 {
            return Err(ProtocolError::malformed(self.kind, "card list truncated"));
        }

        (0..count)
            .map(|_| {
                let rank = self.buf.get_u8();
                let suit = Suit::try_from(self.buf.get_u8())
                    .map_err(|s| ProtocolError::malformed(self.kind, format!("bad suit {s}")))?;
                Card::new(rank, suit)
                    .ok_or_else(|| ProtocolError::malformed(self.kind, format!("bad rank {rank}")))
            })
            .collect()
    }

    fn rest_utf8(&mut self) -> ProtocolResult<String> {
        let text = std::str::from_utf8(self.buf)
            .map_err(|e| ProtocolError::malformed(self.kind, e.to_string()))?
            .to_string();
        self.buf = &[];
        Ok(text)
    }

    fn finish(self) -> ProtocolResult<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::malformed(
                self.kind,
                format!("{} trailing bytes", self.buf.len()),
            ))
        }
    }
}

/// Incremental decoder over a growing receive buffer
pub struct Decoder {
    state: DecodeState,
}

#[derive(Default, Clone, Copy)]
enum DecodeState {
    #[default]
    Header,
    Payload {
        message_type: MessageType,
        length: usize,
    },
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
        }
    }

    /// Attempt to decode a message from the buffer
    /// Returns Ok(None) if more data is needed; consumed bytes are removed
    pub fn decode(&mut self, buf: &mut BytesMut) -> ProtocolResult<Option<Message>> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if buf.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    let (message_type, length) = parse_header(&buf[..HEADER_SIZE])?;
                    buf.advance(HEADER_SIZE);

                    self.state = DecodeState::Payload {
                        message_type,
                        length,
                    };
                }
                DecodeState::Payload {
                    message_type,
                    length,
                } => {
                    if buf.len() < length {
                        return Ok(None);
                    }

                    let payload = buf.split_to(length);
                    self.state = DecodeState::Header;

                    return decode_payload(message_type, &payload).map(Some);
                }
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
