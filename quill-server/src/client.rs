//! TCP client speaking the client side of the protocol.
//!
//! Used by the integration tests and handy for poking at a running server.
//! Messages that arrive while [`SyncClient::login`] waits for its reply are
//! kept and handed out by later [`SyncClient::receive`] calls.

use std::collections::VecDeque;
use std::io;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

use crate::codec::{ClientCodec, Frame};
use crate::error::{CodecError, FramingError};
use crate::protocol::{Digest, InboundMessage, OutboundMessage, Status, UserName};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(#[source] io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("connection closed by server")]
    Closed,
}

pub struct SyncClient {
    framed: Framed<TcpStream, ClientCodec>,
    pending: VecDeque<OutboundMessage>,
}

impl SyncClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Connect)?;
        stream.set_nodelay(true).map_err(ClientError::Connect)?;
        Ok(Self {
            framed: Framed::new(stream, ClientCodec::default()),
            pending: VecDeque::new(),
        })
    }

    pub async fn send(&mut self, message: InboundMessage) -> Result<(), ClientError> {
        self.framed.send(message).await?;
        Ok(())
    }

    /// Write bytes that bypass the encoder.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        let stream = self.framed.get_mut();
        stream.write_all(bytes).await.map_err(CodecError::from)?;
        stream.flush().await.map_err(CodecError::from)?;
        Ok(())
    }

    /// Next message from the server. Fails with `Closed` once the server
    /// has shut the connection.
    pub async fn receive(&mut self) -> Result<OutboundMessage, ClientError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(message);
        }
        match self.framed.next().await {
            Some(Ok(Frame::Message(message))) => Ok(message),
            Some(Ok(Frame::Rejected(error))) => Err(error.into()),
            Some(Err(error)) => Err(error.into()),
            None => Err(ClientError::Closed),
        }
    }

    /// Log in and wait for the server's verdict.
    pub async fn login(&mut self, name: &str, password: &str) -> Result<Status, ClientError> {
        let name = UserName::new(name)?;
        self.send(InboundMessage::UserLogin {
            name,
            password_hash: Digest::of(password.as_bytes()),
        })
        .await?;

        let mut skipped = Vec::new();
        let status = loop {
            match self.receive().await? {
                OutboundMessage::UserLogin { status } | OutboundMessage::Status { status } => {
                    break status;
                }
                other => skipped.push(other),
            }
        };
        self.pending.extend(skipped);
        Ok(status)
    }

    pub async fn logout(&mut self) -> Result<(), ClientError> {
        self.send(InboundMessage::UserLogout).await
    }
}
