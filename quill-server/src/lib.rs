//! # quill-server: collaborative document editing over TCP
//!
//! Clients log in, create/open/save documents and stream small editing
//! operations that the server relays to everyone working on the same
//! document.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   binary protocol   ┌──────────────────────────────┐
//! │ SyncClient  │ ◄─────────────────► │ ClientConnection (per socket)│
//! │ ClientCodec │        TCP          │ ServerCodec                  │
//! └─────────────┘                     └──────────────┬───────────────┘
//!                                                    │ ClientEvent
//!                                                    ▼
//!                      ┌──────────┐          ┌───────────────┐
//!   Console ─quit────► │ Shutdown │ ───────► │  SyncServer   │  single loop,
//!                      └──────────┘          │ (multiplexer) │  total order
//!                                            └───────┬───────┘
//!                                                    │ Envelope
//!                                                    ▼
//!                      ┌────────────────┐    ┌───────────────┐
//!                      │ ClientRegistry │ ◄─ │SyncCoordinator│ ──► DocumentStore
//!                      │ unicast/bcast  │    │   (handler)   │ ──► UserDirectory
//!                      └────────────────┘    └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: message types and both field schedules
//! - [`codec`]: incremental framing for either end of a connection
//! - [`connection`]: one socket with its reader and writer tasks
//! - [`registry`]: connected clients, unicast and broadcast
//! - [`server`]: the event loop, configuration and handler list
//! - [`coordinator`]: login, documents and sync relaying
//! - [`storage`]: document and user collaborators
//! - [`client`]: protocol client
//! - [`console`]: operator commands

pub mod client;
pub mod codec;
pub mod connection;
pub mod console;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use client::{ClientError, SyncClient};
pub use codec::{ClientCodec, Frame, MessageCodec, ServerCodec};
pub use connection::{ClientEvent, ClientId};
pub use console::{CommandError, Console, OperatorCommand};
pub use coordinator::{ActiveSession, SessionState, SyncCoordinator};
pub use error::{
    CodecError, ConfigError, FramingError, HandlerError, RegistryError, ServerError,
    TransportError,
};
pub use protocol::{
    Digest, DocumentId, DocumentName, InboundMessage, MessageType, OutboundMessage, Status,
    UserId, UserName, WireMessage,
};
pub use registry::{ClientRegistry, Envelope, RegistryStats};
pub use server::{Dispatch, HandlerId, MessageHandler, ServerConfig, ShutdownHandle, SyncServer};
pub use storage::{
    AuthError, DocumentError, DocumentHandle, DocumentStore, Edit, MemoryDocumentStore,
    MemoryUserDirectory, UserDirectory,
};
