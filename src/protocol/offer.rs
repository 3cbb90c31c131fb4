//! Discovery offer datagram
//!
//! A fixed six-byte structure: magic marker followed by the TCP port the
//! server accepts game sessions on.

use thiserror::Error;

use super::OFFER_MAGIC;

/// Size of an offer datagram in bytes
pub const OFFER_SIZE: usize = 6;

/// Reasons a datagram is not a valid offer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OfferError {
    #[error("Wrong datagram size: {0} bytes (expected 6)")]
    WrongSize(usize),

    #[error("Bad magic marker: {0:#010x}")]
    BadMagic(u32),
}

/// Server advertisement carried by a discovery datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Offer {
    /// TCP port the server accepts sessions on
    pub port: u16,
}

impl Offer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Encode into the wire format
    pub fn encode(&self) -> [u8; OFFER_SIZE] {
        let mut out = [0u8; OFFER_SIZE];
        out[..4].copy_from_slice(&OFFER_MAGIC.to_be_bytes());
        out[4..].copy_from_slice(&self.port.to_be_bytes());
        out
    }

    /// Decode a received datagram
    pub fn decode(datagram: &[u8]) -> Result<Self, OfferError> {
        if datagram.len() != OFFER_SIZE {
            return Err(OfferError::WrongSize(datagram.len()));
        }

        let magic = u32::from_be_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]);
        if magic != OFFER_MAGIC {
            return Err(OfferError::BadMagic(magic));
        }

        Ok(Self {
            port: u16::from_be_bytes([datagram[4], datagram[5]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_roundtrip() {
        let offer = Offer::new(5555);
        assert_eq!(Offer::decode(&offer.encode()), Ok(offer));
    }

    #[test]
    fn test_offer_layout() {
        assert_eq!(Offer::new(0x15b3).encode(), [0xab, 0xcd, 0xdc, 0xba, 0x15, 0xb3]);
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let mut bytes = Offer::new(5555).encode();
        bytes[0] = 0x00;
        assert!(matches!(Offer::decode(&bytes), Err(OfferError::BadMagic(_))));
    }

    #[test]
    fn test_wrong_size_rejected() {
        assert_eq!(Offer::decode(&[]), Err(OfferError::WrongSize(0)));
        assert_eq!(Offer::decode(&[0xab, 0xcd, 0xdc]), Err(OfferError::WrongSize(3)));

        let mut long = Offer::new(1).encode().to_vec();
        long.push(0);
        assert_eq!(Offer::decode(&long), Err(OfferError::WrongSize(7)));
    }
}
