//! # Transport Abstraction
//!
//! A minimal, async interface for moving frames between endpoints.
//!
//! ## Philosophy
//!
//! - **Frame-Oriented**: `send` takes a complete frame (header included) and
//!   `recv` yields one validated frame body. Envelopes are not interpreted here.
//! - **Non-Blocking Send**: `send` only enqueues. Frames leave in the order
//!   they were queued.
//! - **Fail Closed**: A bad header or an I/O error ends the connection.

use fetchrpc::Address;
use fetchrpc::FrameHeader;
use fetchrpc::HEADER_SIZE;

use crate::error::Error;
use crate::error::Result;

/// A bidirectional frame pipe.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Queues a complete frame for writing.
    fn send(&self, frame: Vec<u8>) -> Result<()>;

    /// Waits for the next frame body. `Ok(None)` means the stream ended.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Closes the connection. Pending and future `recv` calls return `Ok(None)`.
    fn close(&self);

    fn is_alive(&self) -> bool;

    fn peer_address(&self) -> Address;
}

/// Splits a complete in-memory frame into its validated body.
pub(crate) fn unframe(mut frame: Vec<u8>, max_frame_size: u64) -> Result<Vec<u8>> {
    if frame.len() < HEADER_SIZE {
        return Err(Error::ProtocolViolation(format!("short frame of {} bytes", frame.len())));
    }
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&frame[..HEADER_SIZE]);
    let len = FrameHeader::decode(&header).validate(max_frame_size)?;
    if len != frame.len() - HEADER_SIZE {
        return Err(Error::ProtocolViolation(format!(
            "frame announces {} bytes but carries {}",
            len,
            frame.len() - HEADER_SIZE
        )));
    }
    Ok(frame.split_off(HEADER_SIZE))
}
