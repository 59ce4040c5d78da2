//! The set of connected clients and fan-out over them.
//!
//! The registry is the sole owner of every [`ClientConnection`]. Everything
//! else refers to a connection by [`ClientId`] and resolves it here, so a
//! stale id turns into [`RegistryError::UnknownClient`] instead of a dangling
//! reference.
//!
//! Broadcasts encode once and hand the same `Bytes` to every recipient's
//! outbound queue. A recipient whose queue is closed or full is dropped from
//! the registry without affecting the others.
//!
//! Writer tasks outlive their connection until the queue is flushed. The
//! registry keeps their handles so shutdown can wait for the last replies to
//! reach the sockets.

use std::collections::BTreeMap;
use std::mem;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::codec::{Frame, ServerCodec};
use crate::connection::{ClientConnection, ClientEvent, ClientEventKind, ClientId};
use crate::error::{CodecError, RegistryError, TransportError};
use crate::protocol::{InboundMessage, OutboundMessage, WireMessage};

/// A complete inbound message and the connection it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub origin: ClientId,
    pub message: InboundMessage,
}

/// Counters for monitoring the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub accepted: u64,
    pub frames: u64,
    pub rejected: u64,
    pub dropped: u64,
}

/// Messages buffered per client before the client counts as too slow.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

pub struct ClientRegistry {
    clients: BTreeMap<ClientId, ClientConnection>,
    next_id: u64,
    events: mpsc::Sender<ClientEvent>,
    writers: JoinSet<()>,
    max_payload_len: usize,
    max_framing_errors: u32,
    outbound_capacity: usize,
    /// Connections removed since the last `take_departed`.
    departed: Vec<ClientId>,
    stats: RegistryStats,
}

impl ClientRegistry {
    pub fn new(
        events: mpsc::Sender<ClientEvent>,
        max_payload_len: usize,
        max_framing_errors: u32,
    ) -> Self {
        Self {
            clients: BTreeMap::new(),
            next_id: 1,
            events,
            writers: JoinSet::new(),
            max_payload_len,
            max_framing_errors: max_framing_errors.max(1),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            departed: Vec::new(),
            stats: RegistryStats::default(),
        }
    }

    /// Limit each client's outbound queue to `capacity` messages.
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Take ownership of an accepted socket and start its I/O tasks.
    pub fn register(&mut self, stream: TcpStream, peer: SocketAddr) -> ClientId {
        let id = ClientId::new(self.next_id);
        self.next_id += 1;

        // reap writers of connections that have already flushed
        while self.writers.try_join_next().is_some() {}

        let connection = ClientConnection::spawn(
            id,
            stream,
            peer,
            ServerCodec::new(self.max_payload_len),
            self.outbound_capacity,
            self.events.clone(),
            &mut self.writers,
        );
        self.clients.insert(id, connection);
        self.stats.accepted += 1;
        info!("client {id} connected from {peer}");
        id
    }

    /// Drop a connection and close its socket. Idempotent.
    pub fn remove(&mut self, id: ClientId) -> bool {
        match self.clients.remove(&id) {
            Some(connection) => {
                info!(
                    "client {id} ({}) removed after {} messages",
                    connection.peer_addr(),
                    connection.frames_received()
                );
                self.departed.push(id);
                true
            }
            None => false,
        }
    }

    /// Unicast to one connection.
    pub fn send(&mut self, id: ClientId, message: &OutboundMessage) -> Result<(), RegistryError> {
        if !self.clients.contains_key(&id) {
            return Err(RegistryError::UnknownClient(id));
        }
        let bytes = message.to_bytes()?;
        self.deliver(id, bytes).map_err(RegistryError::from)
    }

    /// Send to every connection except `except`. Returns the number of
    /// queues the message reached.
    pub fn broadcast(
        &mut self,
        message: &OutboundMessage,
        except: Option<ClientId>,
    ) -> Result<usize, RegistryError> {
        let recipients: Vec<ClientId> = self
            .clients
            .keys()
            .copied()
            .filter(|id| Some(*id) != except)
            .collect();
        self.multicast(recipients, message)
    }

    /// Send to an explicit set of connections, skipping ids that are gone.
    pub fn multicast(
        &mut self,
        recipients: impl IntoIterator<Item = ClientId>,
        message: &OutboundMessage,
    ) -> Result<usize, RegistryError> {
        let bytes = message.to_bytes()?;
        let mut delivered = 0;
        for id in recipients {
            if !self.clients.contains_key(&id) {
                trace!("skipping departed client {id}");
                continue;
            }
            if self.deliver(id, bytes.clone()).is_ok() {
                delivered += 1;
            }
        }
        trace!(
            "{:?} delivered to {delivered} clients",
            message.message_type()
        );
        Ok(delivered)
    }

    fn deliver(&mut self, id: ClientId, bytes: Bytes) -> Result<(), TransportError> {
        let Some(connection) = self.clients.get(&id) else {
            return Ok(());
        };
        if let Err(error) = connection.enqueue(bytes) {
            warn!("{error}");
            self.stats.dropped += 1;
            self.remove(id);
            return Err(error);
        }
        Ok(())
    }

    /// Turn a socket event into a complete message, or apply its
    /// consequences for the connection.
    pub fn receive(&mut self, event: ClientEvent) -> Option<Envelope> {
        let ClientEvent { client, kind } = event;
        let Some(connection) = self.clients.get_mut(&client) else {
            trace!("dropping event for departed client {client}");
            return None;
        };

        match kind {
            ClientEventKind::Frame(Frame::Message(message)) => {
                connection.record_frame();
                self.stats.frames += 1;
                debug!("client {client} sent {:?}", message.message_type());
                Some(Envelope {
                    origin: client,
                    message,
                })
            }
            ClientEventKind::Frame(Frame::Rejected(error)) => {
                let strikes = connection.record_rejection();
                self.stats.rejected += 1;
                warn!("client {client} sent a malformed message: {error}");
                if strikes >= self.max_framing_errors {
                    warn!("client {client} closed after {strikes} consecutive framing errors");
                    self.remove(client);
                }
                None
            }
            ClientEventKind::Closed => {
                info!("client {client} disconnected");
                self.remove(client);
                None
            }
            ClientEventKind::ReadFailed(source) => {
                if let CodecError::InvalidMessageType { tag } = source {
                    warn!("client {client} sent invalid message type {tag:#04x}, closing");
                } else {
                    warn!("{}", TransportError::Read { client, source });
                }
                self.remove(client);
                None
            }
            ClientEventKind::WriteFailed(source) => {
                warn!("{}", TransportError::Write { client, source });
                self.remove(client);
                None
            }
        }
    }

    /// Ids removed since the previous call, in removal order.
    pub fn take_departed(&mut self) -> Vec<ClientId> {
        mem::take(&mut self.departed)
    }

    /// Remove every connection. Returns how many there were.
    pub fn clear(&mut self) -> usize {
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in &ids {
            self.remove(*id);
        }
        ids.len()
    }

    /// Wait for the writers of removed connections to drain their queues.
    ///
    /// Writers of connections still in the registry never finish, so this is
    /// meant to follow [`clear`](Self::clear). Returns false if `grace` ran
    /// out, in which case the remaining writers are aborted.
    pub async fn flush(&mut self, grace: Duration) -> bool {
        let writers = &mut self.writers;
        let drained = timeout(grace, async {
            while writers.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                "{} writers still busy after {grace:?}, aborting",
                self.writers.len()
            );
            self.writers.abort_all();
        }
        drained
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.keys().copied()
    }

    pub fn peer_addr(&self, id: ClientId) -> Option<SocketAddr> {
        self.clients.get(&id).map(ClientConnection::peer_addr)
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats.clone()
    }
}
