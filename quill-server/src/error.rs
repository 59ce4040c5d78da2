//! Error taxonomy for the protocol core.
//!
//! Errors are split by the boundary that handles them:
//!
//! | Error            | Raised by            | Consequence                              |
//! |------------------|----------------------|------------------------------------------|
//! | `FramingError`   | codec                | message dropped, connection kept          |
//! | `CodecError`     | codec / reader task  | connection closed                         |
//! | `TransportError` | sockets, queues      | connection closed                         |
//! | `RegistryError`  | registry lookups     | reported to the caller                    |
//! | `HandlerError`   | message handlers     | logged, dispatch continues                |
//! | `ServerError`    | multiplexer          | loop terminates                           |

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::connection::ClientId;
use crate::storage::{AuthError, DocumentError};

/// A field that could not be framed. The offending message is skipped but the
/// byte stream is still in sync.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("payload of {length} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { length: usize, limit: usize },

    #[error("name of {length} bytes does not fit a {width} byte field")]
    NameTooLong { length: usize, width: usize },

    #[error("name field is not NUL-padded UTF-8")]
    MalformedName,

    #[error("unknown status code {0:#04x}")]
    InvalidStatus(u8),
}

/// A stream-level decoding failure. After one of these the position in the
/// byte stream can no longer be trusted.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid message type {tag:#04x}")]
    InvalidMessageType { tag: u8 },

    #[error("connection closed after {available} of {expected} bytes")]
    ShortRead { expected: usize, available: usize },

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// OS-level failures on a single connection or on the listener.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("read from client {client} failed: {source}")]
    Read {
        client: ClientId,
        #[source]
        source: CodecError,
    },

    #[error("write to client {client} failed: {source}")]
    Write {
        client: ClientId,
        #[source]
        source: io::Error,
    },

    #[error("outbound queue of client {0} is closed")]
    QueueClosed(ClientId),

    #[error("outbound queue of client {client} is full ({capacity} messages)")]
    QueueFull { client: ClientId, capacity: usize },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] FramingError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failure local to one message handler. The multiplexer logs it and keeps
/// dispatching.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that terminate the multiplexing loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("multiplexer wait failed: {0}")]
    Multiplex(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
