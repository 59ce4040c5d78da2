//! Incremental framing for both ends of a connection.
//!
//! [`MessageCodec`] keeps the receive cursor for one socket: bytes accumulate
//! in the `FramedRead` buffer until [`WireMessage::parse`] can see a whole
//! message. Which layouts are parsed and generated is fixed by the
//! [`Direction`] marker, so a server can never decode with the client's
//! schedule by accident.

use std::marker::PhantomData;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{CodecError, FramingError};
use crate::protocol::{InboundMessage, OutboundMessage, Parse, WireMessage};

/// Default upper bound for a `SYNC_MULTIBYTE` payload.
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 1024 * 1024;

/// One decoded unit from the byte stream.
#[derive(Debug)]
pub enum Frame<T> {
    Message(T),
    /// A well-delimited message with an invalid field. The stream stays usable.
    Rejected(FramingError),
}

/// Which end of the connection a codec serves.
pub trait Direction {
    type Incoming: WireMessage;
    type Outgoing: WireMessage;
}

/// Parses client requests, generates server responses.
#[derive(Debug, Clone, Copy)]
pub struct ServerSide;

/// Parses server responses, generates client requests.
#[derive(Debug, Clone, Copy)]
pub struct ClientSide;

impl Direction for ServerSide {
    type Incoming = InboundMessage;
    type Outgoing = OutboundMessage;
}

impl Direction for ClientSide {
    type Incoming = OutboundMessage;
    type Outgoing = InboundMessage;
}

#[derive(Debug)]
pub struct MessageCodec<D> {
    max_payload_len: usize,
    /// Bytes of a rejected payload that have not arrived yet.
    skip: usize,
    /// Total length of the partial message at the front of the buffer.
    expected: usize,
    _direction: PhantomData<D>,
}

pub type ServerCodec = MessageCodec<ServerSide>;
pub type ClientCodec = MessageCodec<ClientSide>;

impl<D> MessageCodec<D> {
    pub fn new(max_payload_len: usize) -> Self {
        Self {
            max_payload_len,
            skip: 0,
            expected: 0,
            _direction: PhantomData,
        }
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }
}

impl<D> Default for MessageCodec<D> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_LEN)
    }
}

impl<D> Clone for MessageCodec<D> {
    fn clone(&self) -> Self {
        Self::new(self.max_payload_len)
    }
}

impl<D: Direction> Decoder for MessageCodec<D> {
    type Item = Frame<D::Incoming>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.skip > 0 {
            let n = self.skip.min(src.len());
            src.advance(n);
            self.skip -= n;
            if self.skip > 0 {
                return Ok(None);
            }
        }

        match D::Incoming::parse(src, self.max_payload_len)? {
            Parse::Incomplete { expected } => {
                self.expected = expected;
                src.reserve(expected.saturating_sub(src.len()));
                Ok(None)
            }
            Parse::Complete { message, consumed } => {
                self.expected = 0;
                src.advance(consumed);
                Ok(Some(Frame::Message(message)))
            }
            Parse::Rejected {
                error,
                consumed,
                skip,
            } => {
                self.expected = 0;
                src.advance(consumed);
                self.skip = skip;
                Ok(Some(Frame::Rejected(error)))
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if self.skip > 0 {
            return Err(CodecError::ShortRead {
                expected: self.skip,
                available: 0,
            });
        }
        if buf.is_empty() {
            return Ok(None);
        }
        Err(CodecError::ShortRead {
            expected: self.expected,
            available: buf.len(),
        })
    }
}

impl Encoder<OutboundMessage> for MessageCodec<ServerSide> {
    type Error = CodecError;

    fn encode(&mut self, item: OutboundMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)?;
        Ok(())
    }
}

impl Encoder<InboundMessage> for MessageCodec<ClientSide> {
    type Error = CodecError;

    fn encode(&mut self, item: InboundMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)?;
        Ok(())
    }
}
