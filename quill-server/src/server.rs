//! The event multiplexer: one loop that owns every socket and all mutable
//! server state.
//!
//! ```text
//!   TcpListener ─────────────── accept ──────────────┐
//!                                                    ▼
//!   reader tasks ──► ClientEvent (bounded mpsc) ──► SyncServer::run ──► handlers
//!                                                    ▲    │                │
//!   ShutdownHandle ── cancelled ─────────────────────┘    ▼                ▼
//!                                                  ClientRegistry ◄── Dispatch
//! ```
//!
//! Each wake-up handles exactly one source: a new connection, one complete
//! message (or socket event) from one client, or the shutdown signal.
//! Messages are handled strictly in the order they reach the event channel,
//! which is the server's total order over all clients.
//!
//! On shutdown, events that are already queued are still processed, then
//! every connection is closed. `run` returns once the replies still sitting in
//! outbound queues have been written, or the grace period ran out.

use std::fs;
use std::future::Future;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::DEFAULT_MAX_PAYLOAD_LEN;
use crate::connection::{ClientEvent, ClientId};
use crate::error::{ConfigError, HandlerError, ServerError, TransportError};
use crate::registry::{ClientRegistry, Envelope, DEFAULT_OUTBOUND_CAPACITY};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Largest accepted `SYNC_MULTIBYTE` payload in bytes
    pub max_payload_len: usize,
    /// Consecutive framing errors after which a client is disconnected
    pub max_framing_errors: u32,
    /// Capacity of the channel carrying events from all connections
    pub event_queue_capacity: usize,
    /// Messages buffered per client before it is disconnected as too slow
    pub outbound_queue_capacity: usize,
    /// How long shutdown waits for outbound queues to drain, in milliseconds
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            max_framing_errors: 2,
            event_queue_capacity: 1024,
            outbound_queue_capacity: DEFAULT_OUTBOUND_CAPACITY,
            shutdown_grace_ms: 1000,
        }
    }
}

impl ServerConfig {
    /// Load from a JSON file. Missing keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Identifies a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Receives every complete inbound message, in registration order.
///
/// Errors are logged by the server and do not stop dispatch to the handlers
/// after this one.
pub trait MessageHandler: Send {
    fn on_message(&mut self, ctx: &mut Dispatch<'_>, envelope: &Envelope)
        -> Result<(), HandlerError>;

    /// Called once for every client that left the registry, whatever the cause.
    fn on_disconnect(
        &mut self,
        _ctx: &mut Dispatch<'_>,
        _client: ClientId,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// What a handler may touch while it runs.
pub struct Dispatch<'a> {
    registry: &'a mut ClientRegistry,
    removed: &'a mut Vec<HandlerId>,
    current: HandlerId,
}

impl Dispatch<'_> {
    pub fn registry(&mut self) -> &mut ClientRegistry {
        self.registry
    }

    /// Id of the handler being invoked.
    pub fn handler_id(&self) -> HandlerId {
        self.current
    }

    /// Unregister a handler. Takes effect for the rest of the current pass.
    pub fn remove_handler(&mut self, id: HandlerId) {
        if !self.removed.contains(&id) {
            self.removed.push(id);
        }
    }
}

#[derive(Default)]
struct HandlerList {
    entries: Vec<(HandlerId, Box<dyn MessageHandler>)>,
    next_id: u64,
}

impl HandlerList {
    fn add(&mut self, handler: Box<dyn MessageHandler>) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, handler));
        id
    }

    fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Run `call` on every handler of the current list. The list is taken
    /// out for the pass, so removals only hide handlers not yet invoked.
    fn dispatch<F>(&mut self, registry: &mut ClientRegistry, what: &str, mut call: F)
    where
        F: FnMut(&mut dyn MessageHandler, &mut Dispatch<'_>) -> Result<(), HandlerError>,
    {
        let mut entries = mem::take(&mut self.entries);
        let mut removed = Vec::new();

        for (id, handler) in entries.iter_mut() {
            if removed.contains(id) {
                continue;
            }
            let mut ctx = Dispatch {
                registry: &mut *registry,
                removed: &mut removed,
                current: *id,
            };
            if let Err(error) = call(handler.as_mut(), &mut ctx) {
                warn!("handler {id:?} failed on {what}: {error}");
            }
        }

        entries.retain(|(id, _)| !removed.contains(id));
        self.entries = entries;
    }
}

/// Clonable trigger for the multiplexer's clean shutdown path.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(CancellationToken);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolve once `shutdown` has been called.
    pub async fn wait(&self) {
        self.0.cancelled().await;
    }

    /// Shut down when `signal` completes. If the signal cannot be awaited the
    /// server keeps running.
    pub async fn shutdown_on<F>(&self, signal: F)
    where
        F: Future<Output = io::Result<()>>,
    {
        match signal.await {
            Ok(()) => {
                info!("stop signal received");
                self.shutdown();
            }
            Err(error) => warn!("cannot listen for the stop signal: {error}"),
        }
    }
}

enum Wake {
    Shutdown,
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Event(Option<ClientEvent>),
}

pub struct SyncServer {
    config: ServerConfig,
    listener: TcpListener,
    registry: ClientRegistry,
    events: mpsc::Receiver<ClientEvent>,
    handlers: HandlerList,
    shutdown: ShutdownHandle,
}

impl SyncServer {
    /// Bind the listening socket. Handlers can be added before `run`.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        let (sender, events) = mpsc::channel(config.event_queue_capacity.max(1));
        let registry = ClientRegistry::new(
            sender,
            config.max_payload_len,
            config.max_framing_errors,
        )
        .with_outbound_capacity(config.outbound_queue_capacity);

        Ok(Self {
            config,
            listener,
            registry,
            events,
            handlers: HandlerList::default(),
            shutdown: ShutdownHandle::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn add_handler(&mut self, handler: impl MessageHandler + 'static) -> HandlerId {
        self.handlers.add(Box::new(handler))
    }

    /// Returns false if the handler was not registered.
    pub fn remove_handler(&mut self, id: HandlerId) -> bool {
        self.handlers.remove(id)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Run until the shutdown handle fires.
    pub async fn run(mut self) -> Result<(), ServerError> {
        match self.local_addr() {
            Ok(addr) => info!("sync server listening on {addr}"),
            Err(_) => info!("sync server listening on {}", self.config.bind_addr),
        }
        let shutdown = self.shutdown.0.clone();

        loop {
            let wake = tokio::select! {
                biased;

                () = shutdown.cancelled() => Wake::Shutdown,
                accepted = self.listener.accept() => Wake::Accepted(accepted),
                event = self.events.recv() => Wake::Event(event),
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Accepted(Ok((stream, peer))) => {
                    self.registry.register(stream, peer);
                }
                Wake::Accepted(Err(source)) => {
                    warn!("{}", TransportError::Accept(source));
                }
                Wake::Event(Some(event)) => self.process(event),
                Wake::Event(None) => {
                    error!("event channel closed");
                    return Err(ServerError::Multiplex("event channel closed"));
                }
            }
        }

        // events already delivered before the signal are still handled
        while let Ok(event) = self.events.try_recv() {
            self.process(event);
        }

        let closed = self.registry.clear();
        self.registry.take_departed();
        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        if !self.registry.flush(grace).await {
            warn!("some replies were not delivered before shutdown");
        }
        let stats = self.registry.stats();
        info!(
            "sync server stopped: closed {closed} connections, {} accepted, {} messages, {} rejected, {} dropped",
            stats.accepted, stats.frames, stats.rejected, stats.dropped
        );
        Ok(())
    }

    fn process(&mut self, event: ClientEvent) {
        if let Some(envelope) = self.registry.receive(event) {
            self.handlers
                .dispatch(&mut self.registry, "message", |handler, ctx| {
                    handler.on_message(ctx, &envelope)
                });
        }
        self.notify_departed();
    }

    fn notify_departed(&mut self) {
        loop {
            let departed = self.registry.take_departed();
            if departed.is_empty() {
                break;
            }
            for client in departed {
                debug!("notifying handlers that client {client} left");
                self.handlers
                    .dispatch(&mut self.registry, "disconnect", |handler, ctx| {
                        handler.on_disconnect(ctx, client)
                    });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::protocol::{InboundMessage, OutboundMessage};
    use std::io::Write;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.max_payload_len, 1024 * 1024);
        assert_eq!(config.max_framing_errors, 2);
        assert_eq!(config.event_queue_capacity, 1024);
        assert_eq!(config.outbound_queue_capacity, 256);
        assert_eq!(config.shutdown_grace_ms, 1000);
    }

    #[test]
    fn test_config_from_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "bind_addr": "0.0.0.0:7000", "max_framing_errors": 5 }}"#).unwrap();

        let config = ServerConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:7000");
        assert_eq!(config.max_framing_errors, 5);
        assert_eq!(config.max_payload_len, DEFAULT_MAX_PAYLOAD_LEN);
    }

    #[test]
    fn test_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            ServerConfig::from_json_file(&missing),
            Err(ConfigError::Read { .. })
        ));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            ServerConfig::from_json_file(&broken),
            Err(ConfigError::Parse { .. })
        ));
    }

    /// Appends its tag to a shared log and optionally misbehaves.
    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
        remove: Option<HandlerId>,
    }

    impl MessageHandler for Recorder {
        fn on_message(
            &mut self,
            ctx: &mut Dispatch<'_>,
            _envelope: &Envelope,
        ) -> Result<(), HandlerError> {
            self.log.lock().unwrap().push(self.tag);
            if let Some(id) = self.remove {
                ctx.remove_handler(id);
            }
            if self.fail {
                return Err(RegistryError::UnknownClient(ClientId::new(0)).into());
            }
            Ok(())
        }
    }

    fn recorder(tag: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Recorder {
        Recorder {
            tag,
            log: Arc::clone(log),
            fail: false,
            remove: None,
        }
    }

    fn envelope() -> Envelope {
        Envelope {
            origin: ClientId::new(1),
            message: InboundMessage::UserLogout,
        }
    }

    fn dispatch_once(list: &mut HandlerList, registry: &mut ClientRegistry) {
        let envelope = envelope();
        list.dispatch(registry, "message", |handler, ctx| {
            handler.on_message(ctx, &envelope)
        });
    }

    #[test]
    fn test_handlers_run_in_registration_order_despite_errors() {
        let (tx, _rx) = mpsc::channel(1);
        let mut registry = ClientRegistry::new(tx, 16, 2);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut list = HandlerList::default();

        list.add(Box::new(recorder("a", &log)));
        list.add(Box::new(Recorder {
            fail: true,
            ..recorder("b", &log)
        }));
        list.add(Box::new(recorder("c", &log)));

        dispatch_once(&mut list, &mut registry);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_removal_during_dispatch_skips_pending_handler() {
        let (tx, _rx) = mpsc::channel(1);
        let mut registry = ClientRegistry::new(tx, 16, 2);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut list = HandlerList::default();

        // ids are allocated in order, so "c" will be HandlerId(2)
        list.add(Box::new(Recorder {
            remove: Some(HandlerId(2)),
            ..recorder("a", &log)
        }));
        list.add(Box::new(recorder("b", &log)));
        list.add(Box::new(recorder("c", &log)));

        dispatch_once(&mut list, &mut registry);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(list.len(), 2);

        dispatch_once(&mut list, &mut registry);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut list = HandlerList::default();
        let id = list.add(Box::new(recorder("a", &log)));
        assert!(list.remove(id));
        assert!(!list.remove(id));
    }

    #[tokio::test]
    async fn test_failed_signal_does_not_shut_down() {
        let handle = ShutdownHandle::default();
        handle
            .shutdown_on(async { Err(io::Error::other("no signal handler")) })
            .await;
        assert!(!handle.is_shutdown());

        handle.shutdown_on(async { Ok(()) }).await;
        assert!(handle.is_shutdown());
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };
        let server = SyncServer::bind(config).await.unwrap();
        let handle = server.shutdown_handle();
        handle.shutdown();
        assert!(handle.is_shutdown());
        server.run().await.unwrap();
    }

    /// Replies to every `SYNC_CURSOR` with the same position.
    struct Echo;

    impl MessageHandler for Echo {
        fn on_message(
            &mut self,
            ctx: &mut Dispatch<'_>,
            envelope: &Envelope,
        ) -> Result<(), HandlerError> {
            if let InboundMessage::SyncCursor { position } = envelope.message {
                ctx.registry()
                    .send(envelope.origin, &OutboundMessage::SyncCursor { position })?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_queued_events_are_handled_on_shutdown() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };
        let mut server = SyncServer::bind(config).await.unwrap();
        server.add_handler(Echo);

        let mut client = TcpStream::connect(server.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, peer) = server.listener.accept().await.unwrap();
        server.registry.register(stream, peer);

        let mut wire = Vec::new();
        for position in [1u8, 2, 3] {
            wire.extend_from_slice(&[0x22, 0, 0, 0, position]);
        }
        client.write_all(&wire).await.unwrap();

        // wait until the reader task has queued all three messages
        tokio::time::timeout(Duration::from_secs(2), async {
            while server.events.len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("messages were not queued in time");

        server.shutdown_handle().shutdown();
        server.run().await.unwrap();

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut received))
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(received, wire);
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let config = ServerConfig {
            bind_addr: "not an address".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            SyncServer::bind(config).await,
            Err(ServerError::Bind { .. })
        ));
    }
}
