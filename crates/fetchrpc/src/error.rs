//! # Error Definitions
//!
//! Two families live here:
//!
//! - `ServiceError` is the structured, serializable failure that crosses the
//!   wire in an `Error` reply and ends up in a failed `Promise`.
//! - `Error` is a local failure of the framing/envelope machinery itself.

use fetchpack::Decoder;
use fetchpack::Encoder;
use fetchpack::Pack;
use fetchpack::Unpack;
use fetchpack::Error as PackError;

/// Wire codes for `ServiceError`.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A function id was registered twice on one protocol.
    MemberExists = 1,
    /// No function registered under the requested id.
    MemberNotFound = 2,
    /// A feed id was registered twice on one protocol.
    FeedExists = 3,
    /// No feed registered under the requested id.
    FeedNotFound = 4,
    /// A protocol id was added twice to one server.
    ProtocolExists = 5,
    /// No protocol registered under the requested id.
    ProtocolNotFound = 6,
    /// The argument bytes did not match the function signature.
    BadArguments = 7,
    /// The codec failed while encoding or decoding a value.
    Serialization = 8,
    /// The request could not be handed to the transport.
    CouldNotDeliver = 9,
    /// The connection failed while the exchange was pending.
    ConnectionLost = 10,
    /// The exchange outlived the dispatcher timeout.
    TimedOut = 11,
    /// A newer exchange reused the same key before this one completed.
    ExchangeEvicted = 12,
    /// The callable reported a business-logic failure.
    Application = 13,
    /// A code this build does not know about.
    Unknown = 14,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Self {
        match v {
            1 => ErrorCode::MemberExists,
            2 => ErrorCode::MemberNotFound,
            3 => ErrorCode::FeedExists,
            4 => ErrorCode::FeedNotFound,
            5 => ErrorCode::ProtocolExists,
            6 => ErrorCode::ProtocolNotFound,
            7 => ErrorCode::BadArguments,
            8 => ErrorCode::Serialization,
            9 => ErrorCode::CouldNotDeliver,
            10 => ErrorCode::ConnectionLost,
            11 => ErrorCode::TimedOut,
            12 => ErrorCode::ExchangeEvicted,
            13 => ErrorCode::Application,
            _ => ErrorCode::Unknown,
        }
    }
}

/// A structured failure carrying a code and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// A business-logic failure raised from inside a callable.
    pub fn application(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Application, message)
    }

    pub fn member_exists(function: u16) -> Self {
        Self::new(ErrorCode::MemberExists, format!("member {} already exists", function))
    }

    pub fn member_not_found(function: u16) -> Self {
        Self::new(ErrorCode::MemberNotFound, format!("member {} not found", function))
    }

    pub fn feed_exists(feed: u16) -> Self {
        Self::new(ErrorCode::FeedExists, format!("feed {} already exists", feed))
    }

    pub fn feed_not_found(feed: u16) -> Self {
        Self::new(ErrorCode::FeedNotFound, format!("feed {} not found", feed))
    }

    pub fn protocol_exists(protocol: u16) -> Self {
        Self::new(ErrorCode::ProtocolExists, format!("protocol {} already exists", protocol))
    }

    pub fn protocol_not_found(protocol: u16) -> Self {
        Self::new(ErrorCode::ProtocolNotFound, format!("protocol {} not found", protocol))
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({}): {}", self.code, self.code.as_u16(), self.message)
    }
}

impl std::error::Error for ServiceError {}

impl From<PackError> for ServiceError {
    fn from(e: PackError) -> Self {
        Self::new(ErrorCode::Serialization, e.to_string())
    }
}

impl Pack for ServiceError {
    fn pack(&self, enc: &mut Encoder) -> fetchpack::Result<()> {
        enc.u16(self.code.as_u16());
        enc.str(&self.message)
    }
}

impl Unpack for ServiceError {
    fn unpack(dec: &mut Decoder<'_>) -> fetchpack::Result<Self> {
        let code = ErrorCode::from_u16(dec.u16()?);
        let message = dec.str()?.to_owned();
        Ok(Self { code, message })
    }
}

/// Operational failures within the framing and envelope layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying codec failed (e.g., truncated envelope).
    Codec(PackError),
    /// The frame header did not start with the network magic.
    BadMagic(u64),
    /// The frame header announced a body larger than allowed.
    FrameTooLarge { length: u64, max: u64 },
    /// The first envelope byte is not a known message kind.
    UnknownKind(u8),
    /// A structured service failure.
    Service(ServiceError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Codec(e) => write!(f, "Codec error: {}", e),
            Error::BadMagic(m) => write!(f, "Bad frame magic: {:#018x}", m),
            Error::FrameTooLarge { length, max } => {
                write!(f, "Frame of {} bytes exceeds limit of {} bytes", length, max)
            }
            Error::UnknownKind(k) => write!(f, "Unknown message kind: {:#04x}", k),
            Error::Service(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self { Self::Codec(e) }
}

impl From<ServiceError> for Error {
    fn from(e: ServiceError) -> Self { Self::Service(e) }
}

/// A specialized Result type for framing operations.
pub type Result<T> = std::result::Result<T, Error>;
