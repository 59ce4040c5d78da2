//! One accepted client socket.
//!
//! ```text
//!            ┌──────────── ClientConnection ─────────────┐
//! socket ──► │ reader task: FramedRead<ServerCodec>      │ ──► ClientEvent (shared mpsc)
//!            │ writer task: outbound queue → write_all   │ ◄── enqueue(Bytes)
//!            └───────────────────────────────────────────┘
//! ```
//!
//! Neither task touches shared state: the reader only forwards frames to the
//! multiplexer, the writer only drains the queue. Dropping the connection
//! aborts the reader and closes the queue, after which the writer flushes what
//! is left and shuts the socket down.
//!
//! The outbound queue is bounded. A peer that stops reading fills it, and the
//! next enqueue fails with [`TransportError::QueueFull`] instead of buffering
//! without limit.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::StreamExt;
use log::{debug, trace};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::FramedRead;

use crate::codec::{Frame, ServerCodec};
use crate::error::{CodecError, TransportError};
use crate::protocol::InboundMessage;

/// Registry key for a connection. Never reused within one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl ClientId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something happened on a client socket.
#[derive(Debug)]
pub struct ClientEvent {
    pub client: ClientId,
    pub kind: ClientEventKind,
}

#[derive(Debug)]
pub enum ClientEventKind {
    Frame(Frame<InboundMessage>),
    /// The peer closed the socket on a message boundary.
    Closed,
    ReadFailed(CodecError),
    WriteFailed(io::Error),
}

pub struct ClientConnection {
    id: ClientId,
    peer: SocketAddr,
    outbound: mpsc::Sender<Bytes>,
    reader: JoinHandle<()>,
    consecutive_rejections: u32,
    frames_received: u64,
}

impl ClientConnection {
    pub(crate) fn spawn(
        id: ClientId,
        stream: TcpStream,
        peer: SocketAddr,
        codec: ServerCodec,
        outbound_capacity: usize,
        events: mpsc::Sender<ClientEvent>,
        writers: &mut JoinSet<()>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbound, queue) = mpsc::channel(outbound_capacity.max(1));

        let reader = tokio::spawn(read_frames(
            id,
            FramedRead::new(read_half, codec),
            events.clone(),
        ));
        writers.spawn(write_frames(id, write_half, queue, events));

        Self {
            id,
            peer,
            outbound,
            reader,
            consecutive_rejections: 0,
            frames_received: 0,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Queue bytes for the writer task. Never blocks.
    pub fn enqueue(&self, bytes: Bytes) -> Result<(), TransportError> {
        self.outbound.try_send(bytes).map_err(|error| match error {
            TrySendError::Full(_) => TransportError::QueueFull {
                client: self.id,
                capacity: self.outbound.max_capacity(),
            },
            TrySendError::Closed(_) => TransportError::QueueClosed(self.id),
        })
    }

    pub(crate) fn record_frame(&mut self) {
        self.frames_received += 1;
        self.consecutive_rejections = 0;
    }

    /// Returns the number of consecutive rejected frames.
    pub(crate) fn record_rejection(&mut self) -> u32 {
        self.consecutive_rejections += 1;
        self.consecutive_rejections
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("frames_received", &self.frames_received)
            .finish()
    }
}

async fn read_frames(
    id: ClientId,
    mut frames: FramedRead<OwnedReadHalf, ServerCodec>,
    events: mpsc::Sender<ClientEvent>,
) {
    loop {
        let kind = match frames.next().await {
            Some(Ok(frame)) => ClientEventKind::Frame(frame),
            Some(Err(error)) => ClientEventKind::ReadFailed(error),
            None => ClientEventKind::Closed,
        };
        let last = !matches!(kind, ClientEventKind::Frame(_));
        if events.send(ClientEvent { client: id, kind }).await.is_err() || last {
            break;
        }
    }
    trace!("reader for client {id} finished");
}

async fn write_frames(
    id: ClientId,
    mut socket: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Bytes>,
    events: mpsc::Sender<ClientEvent>,
) {
    while let Some(bytes) = queue.recv().await {
        if let Err(error) = socket.write_all(&bytes).await {
            debug!("write to client {id} failed: {error}");
            let _ = events
                .send(ClientEvent {
                    client: id,
                    kind: ClientEventKind::WriteFailed(error),
                })
                .await;
            return;
        }
    }
    // queue closed: the registry let go of this connection
    let _ = socket.shutdown().await;
    trace!("writer for client {id} finished");
}
