//! # Frames and Envelopes
//!
//! Every packet on the wire is a fixed 16-byte header followed by a body:
//!
//! ```text
//! [Magic: u64][Length: u64][Body: Length]
//! ```
//!
//! The body is an `Envelope`: a one-byte kind followed by kind-specific
//! fields. Arguments, return values and feed payloads are opaque byte tails
//! whose layout only the two endpoints of a call agree on.
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Strict Framing**: A header with the wrong magic is never interpreted.

use fetchpack::Decoder;
use fetchpack::Encoder;
use fetchpack::Unpack;

use crate::FeedId;
use crate::FunctionId;
use crate::ProtocolId;
use crate::SubscriptionId;
use crate::error::Error;
use crate::error::Result;
use crate::error::ServiceError;

/// Network magic stamped at the front of every frame.
pub const MAGIC: u64 = 0xFE7C_80A1_FE7C_80A1;

/// Size in bytes of the frame header.
pub const HEADER_SIZE: usize = 16;

/// Default upper bound on a frame body.
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

/// The fixed-size header preceding every frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u64,
    pub length: u64,
}

impl FrameHeader {
    /// A header announcing `length` body bytes.
    pub fn new(length: u64) -> Self {
        Self { magic: MAGIC, length }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..8].copy_from_slice(&self.magic.to_be_bytes());
        out[8..].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 8];
        let mut length = [0u8; 8];
        magic.copy_from_slice(&bytes[..8]);
        length.copy_from_slice(&bytes[8..]);
        Self {
            magic: u64::from_be_bytes(magic),
            length: u64::from_be_bytes(length),
        }
    }

    /// Checks the magic and the announced length, returning the body size.
    pub fn validate(&self, max_frame_size: u64) -> Result<usize> {
        if self.magic != MAGIC {
            return Err(Error::BadMagic(self.magic));
        }
        if self.length > max_frame_size || self.length > usize::MAX as u64 {
            return Err(Error::FrameTooLarge { length: self.length, max: max_frame_size });
        }
        Ok(self.length as usize)
    }
}

/// Prefixes a body with its frame header.
pub fn to_frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
    out.extend_from_slice(&FrameHeader::new(body.len() as u64).encode());
    out.extend_from_slice(body);
    out
}

/// The first byte of every envelope.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Call = 1,
    Reply = 2,
    Error = 3,
    Subscribe = 4,
    Unsubscribe = 5,
    Feed = 6,
}

impl Kind {
    pub fn from_u8(b: u8) -> Result<Self> {
        match b {
            1 => Ok(Kind::Call),
            2 => Ok(Kind::Reply),
            3 => Ok(Kind::Error),
            4 => Ok(Kind::Subscribe),
            5 => Ok(Kind::Unsubscribe),
            6 => Ok(Kind::Feed),
            _ => Err(Error::UnknownKind(b)),
        }
    }
}

/// A decoded message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Invoke `function` of `protocol`; `args` holds the packed argument list.
    Call { protocol: ProtocolId, function: FunctionId, counter: u64, args: Vec<u8> },
    /// The packed return value of the call tagged `counter`.
    Reply { counter: u64, value: Vec<u8> },
    /// The call tagged `counter` failed.
    Error { counter: u64, error: ServiceError },
    Subscribe { protocol: ProtocolId, feed: FeedId, subscription: SubscriptionId },
    Unsubscribe { protocol: ProtocolId, feed: FeedId, subscription: SubscriptionId },
    /// One published item for `subscription`.
    Feed { protocol: ProtocolId, feed: FeedId, subscription: SubscriptionId, payload: Vec<u8> },
}

impl Envelope {
    pub fn kind(&self) -> Kind {
        match self {
            Envelope::Call { .. } => Kind::Call,
            Envelope::Reply { .. } => Kind::Reply,
            Envelope::Error { .. } => Kind::Error,
            Envelope::Subscribe { .. } => Kind::Subscribe,
            Envelope::Unsubscribe { .. } => Kind::Unsubscribe,
            Envelope::Feed { .. } => Kind::Feed,
        }
    }

    /// Encode this envelope into the encoder.
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.u8(self.kind() as u8);
        match self {
            Envelope::Call { protocol, function, counter, args } => {
                enc.u16(*protocol);
                enc.u16(*function);
                enc.u64(*counter);
                enc.write_bytes(args);
            }
            Envelope::Reply { counter, value } => {
                enc.u64(*counter);
                enc.write_bytes(value);
            }
            Envelope::Error { counter, error } => {
                enc.u64(*counter);
                enc.pack(error)?;
            }
            Envelope::Subscribe { protocol, feed, subscription }
            | Envelope::Unsubscribe { protocol, feed, subscription } => {
                enc.u16(*protocol);
                enc.u16(*feed);
                enc.u64(*subscription);
            }
            Envelope::Feed { protocol, feed, subscription, payload } => {
                enc.u16(*protocol);
                enc.u16(*feed);
                enc.u64(*subscription);
                enc.write_bytes(payload);
            }
        }
        Ok(())
    }

    /// Decode an envelope from a complete frame body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(body);
        let kind = Kind::from_u8(dec.u8()?)?;

        let envelope = match kind {
            Kind::Call => Envelope::Call {
                protocol: dec.u16()?,
                function: dec.u16()?,
                counter: dec.u64()?,
                args: dec.take_rest().to_vec(),
            },
            Kind::Reply => Envelope::Reply {
                counter: dec.u64()?,
                value: dec.take_rest().to_vec(),
            },
            Kind::Error => Envelope::Error {
                counter: dec.u64()?,
                error: ServiceError::unpack(&mut dec)?,
            },
            Kind::Subscribe => Envelope::Subscribe {
                protocol: dec.u16()?,
                feed: dec.u16()?,
                subscription: dec.u64()?,
            },
            Kind::Unsubscribe => Envelope::Unsubscribe {
                protocol: dec.u16()?,
                feed: dec.u16()?,
                subscription: dec.u64()?,
            },
            Kind::Feed => Envelope::Feed {
                protocol: dec.u16()?,
                feed: dec.u16()?,
                subscription: dec.u64()?,
                payload: dec.take_rest().to_vec(),
            },
        };

        Ok(envelope)
    }

    /// Encode this envelope into a standalone body.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::with_capacity(self.size_hint());
        self.encode(&mut enc)?;
        Ok(enc.into_bytes())
    }

    /// Encode this envelope into a complete frame, header included.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        Ok(to_frame(&self.to_bytes()?))
    }

    fn size_hint(&self) -> usize {
        // kind + the largest fixed prefix (u16, u16, u64)
        let fixed = 1 + 12;
        match self {
            Envelope::Call { args, .. } => fixed + args.len(),
            Envelope::Reply { value, .. } => fixed + value.len(),
            Envelope::Error { error, .. } => fixed + 6 + error.message.len(),
            Envelope::Feed { payload, .. } => fixed + payload.len(),
            Envelope::Subscribe { .. } | Envelope::Unsubscribe { .. } => fixed,
        }
    }
}
