//! In-memory transport over tokio mpsc channels.
//!
//! Frames sent on one end appear on the other end's `recv`, header and all,
//! so the same validation applies as on a socket. Closing one end ends the
//! stream on the other.

use std::sync::Mutex;
use std::sync::PoisonError;

use tokio::sync::mpsc;
use tokio::sync::watch;

use fetchrpc::Address;
use fetchrpc::DEFAULT_MAX_FRAME_SIZE;

use crate::error::Error;
use crate::error::Result;
use crate::transport::Transport;
use crate::transport::unframe;

pub struct DuplexTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: watch::Sender<bool>,
    peer: Address,
    max_frame_size: u64,
}

impl DuplexTransport {
    fn new(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
        peer: Address,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            closed,
            peer,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Creates a pair of transports connected to each other.
    ///
    /// Each end reports the other's address as its peer.
    pub fn pair(a: impl Into<Address>, b: impl Into<Address>) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let end_a = Self::new(tx_a, rx_b, b.into());
        let end_b = Self::new(tx_b, rx_a, a.into());
        (end_a, end_b)
    }

    pub fn with_max_frame_size(mut self, max: u64) -> Self {
        self.max_frame_size = max;
        self
    }
}

#[async_trait::async_trait]
impl Transport for DuplexTransport {
    fn send(&self, frame: Vec<u8>) -> Result<()> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| Error::ConnectionClosed),
            None => Err(Error::ConnectionClosed),
        }
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }

        let mut rx = self.rx.lock().await;
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => unframe(frame, self.max_frame_size).map(Some),
                None => Ok(None),
            },
            _ = async { let _ = closed.wait_for(|c| *c).await; } => Ok(None),
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn is_alive(&self) -> bool {
        !*self.closed.borrow()
    }

    fn peer_address(&self) -> Address {
        self.peer.clone()
    }
}
