//! # TCP Transport
//!
//! Frames over a tokio `TcpStream`.
//!
//! Reads happen in whichever task calls `recv`. Writes go through a queue
//! guarded by a mutex together with a `writing` flag: the sender that finds
//! the flag clear spawns a writer task, which drains the queue in order and
//! clears the flag once the queue is empty.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::runtime::Handle;
use tokio::sync::watch;

use fetchrpc::Address;
use fetchrpc::FrameHeader;
use fetchrpc::HEADER_SIZE;

use crate::error::Error;
use crate::error::Result;
use crate::transport::Transport;

#[derive(Default)]
struct WriteQueue {
    frames: VecDeque<Vec<u8>>,
    writing: bool,
}

struct Shared {
    queue: Mutex<WriteQueue>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    closed: watch::Sender<bool>,
    runtime: Handle,
}

impl Shared {
    fn mark_closed(&self) -> bool {
        !self.closed.send_replace(true)
    }

    /// Writes queued frames until the queue is empty.
    async fn drain(self: Arc<Self>) {
        let mut writer = self.writer.lock().await;
        loop {
            let next = {
                let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                match queue.frames.pop_front() {
                    Some(frame) => frame,
                    None => {
                        queue.writing = false;
                        return;
                    }
                }
            };

            if let Err(e) = writer.write_all(&next).await {
                tracing::warn!(error = %e, "write failed, closing connection");
                self.mark_closed();
                let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                queue.frames.clear();
                queue.writing = false;
                return;
            }
        }
    }
}

pub struct TcpTransport {
    shared: Arc<Shared>,
    reader: tokio::sync::Mutex<OwnedReadHalf>,
    peer: Address,
    max_frame_size: u64,
}

impl TcpTransport {
    /// Wraps an established stream. Must be called from within a tokio runtime.
    pub fn new(stream: TcpStream, max_frame_size: u64) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NotConnected)?;
        let peer = Address::from(stream.peer_addr()?);
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (closed, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(WriteQueue::default()),
                writer: tokio::sync::Mutex::new(write_half),
                closed,
                runtime,
            }),
            reader: tokio::sync::Mutex::new(read_half),
            peer,
            max_frame_size,
        })
    }

    /// Resolves `addr` (`host:port`) and connects to the first address that answers.
    pub async fn connect(addr: &str, max_frame_size: u64) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        tracing::debug!(%addr, "tcp connection established");
        Self::new(stream, max_frame_size)
    }

    async fn read_frame(reader: &mut OwnedReadHalf, max_frame_size: u64) -> Result<Option<Vec<u8>>> {
        let mut header = [0u8; HEADER_SIZE];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = FrameHeader::decode(&header).validate(max_frame_size)?;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        Ok(Some(body))
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    fn send(&self, frame: Vec<u8>) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::ConnectionClosed);
        }

        let spawn_writer = {
            let mut queue = self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.frames.push_back(frame);
            !std::mem::replace(&mut queue.writing, true)
        };

        if spawn_writer {
            self.shared.runtime.spawn(self.shared.clone().drain());
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut closed = self.shared.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }

        let mut reader = self.reader.lock().await;
        tokio::select! {
            frame = Self::read_frame(&mut reader, self.max_frame_size) => frame,
            _ = async { let _ = closed.wait_for(|c| *c).await; } => Ok(None),
        }
    }

    fn close(&self) {
        if !self.shared.mark_closed() {
            return;
        }
        tracing::debug!(peer = %self.peer, "closing tcp transport");
        let shared = self.shared.clone();
        self.shared.runtime.spawn(async move {
            let mut writer = shared.writer.lock().await;
            let _ = writer.shutdown().await;
        });
    }

    fn is_alive(&self) -> bool {
        !*self.shared.closed.borrow()
    }

    fn peer_address(&self) -> Address {
        self.peer.clone()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shared.mark_closed();
    }
}
