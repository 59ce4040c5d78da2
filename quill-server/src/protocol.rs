//! Binary wire protocol for document synchronization.
//!
//! Every message starts with a one-byte tag. The same tag describes two
//! different layouts depending on which way the message travels, so the two
//! directions are modelled as separate types: [`InboundMessage`] for
//! client → server and [`OutboundMessage`] for server → client.
//!
//! ```text
//! tag             client → server            server → client
//! ──────────────  ─────────────────────────  ───────────────────────────────
//! DOC_CREATE      name                       status, name
//! DOC_DELETE      name                       status, name
//! DOC_OPEN        name                       status, id, name
//! DOC_SAVE        id                         status, id
//! DOC_ACTIVATE    id, hash                   status, id
//! SYNC_BYTE       byte                       position, byte
//! SYNC_CURSOR     position                   position
//! SYNC_DELETION   position, length           position, length
//! SYNC_MULTIBYTE  length, payload[length]    position, length, payload[length]
//! USER_LOGIN      name, hash                 status
//! USER_LOGOUT     -                          (never sent)
//! USER_JOIN       (never sent)               id, name
//! USER_QUIT       (never sent)               id
//! STATUS          (never sent)               status
//! ```
//!
//! Integers are big-endian. Names and hashes are fixed width; names are
//! UTF-8 padded with NUL bytes. The only variable-length field is the
//! `SYNC_MULTIBYTE` payload, always preceded by its length.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest as _, Sha1};

use crate::error::{CodecError, FramingError};

pub const TYPE_WIDTH: usize = 1;
pub const STATUS_WIDTH: usize = 1;
pub const ID_WIDTH: usize = 4;
pub const SIZE_WIDTH: usize = 4;
pub const HASH_WIDTH: usize = 20;
pub const SYNC_BYTE_WIDTH: usize = 1;
pub const DOC_NAME_WIDTH: usize = 64;
pub const USER_NAME_WIDTH: usize = 32;

/// One-byte message discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Status = 0x01,
    DocCreate = 0x10,
    DocOpen = 0x11,
    DocSave = 0x12,
    DocDelete = 0x13,
    DocActivate = 0x14,
    SyncByte = 0x20,
    SyncMultibyte = 0x21,
    SyncCursor = 0x22,
    SyncDeletion = 0x23,
    UserLogin = 0x30,
    UserLogout = 0x31,
    UserJoin = 0x32,
    UserQuit = 0x33,
}

impl MessageType {
    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        let ty = match tag {
            0x01 => Self::Status,
            0x10 => Self::DocCreate,
            0x11 => Self::DocOpen,
            0x12 => Self::DocSave,
            0x13 => Self::DocDelete,
            0x14 => Self::DocActivate,
            0x20 => Self::SyncByte,
            0x21 => Self::SyncMultibyte,
            0x22 => Self::SyncCursor,
            0x23 => Self::SyncDeletion,
            0x30 => Self::UserLogin,
            0x31 => Self::UserLogout,
            0x32 => Self::UserJoin,
            0x33 => Self::UserQuit,
            _ => return None,
        };
        Some(ty)
    }

    /// Whether the tag has a client → server layout.
    pub const fn is_request(self) -> bool {
        !matches!(self, Self::Status | Self::UserJoin | Self::UserQuit)
    }

    /// Whether the tag has a server → client layout.
    pub const fn is_response(self) -> bool {
        !matches!(self, Self::UserLogout)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Self::from_tag(tag).ok_or(CodecError::InvalidMessageType { tag })
    }
}

/// Outcome code carried by acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Success = 0x00,
    Failure = 0x01,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    fn from_wire(raw: u8) -> Result<Self, FramingError> {
        match raw {
            0x00 => Ok(Self::Success),
            0x01 => Ok(Self::Failure),
            other => Err(FramingError::InvalidStatus(other)),
        }
    }
}

impl From<bool> for Status {
    fn from(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DocumentId(pub u32);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UserId(pub u32);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 20-byte SHA-1 digest, used for document contents and password hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Digest(pub [u8; HASH_WIDTH]);

impl Digest {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha1::digest(bytes).into())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

/// A name stored in a fixed-width, NUL-padded field.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FixedName<const WIDTH: usize>(String);

pub type DocumentName = FixedName<DOC_NAME_WIDTH>;
pub type UserName = FixedName<USER_NAME_WIDTH>;

impl<const WIDTH: usize> FixedName<WIDTH> {
    /// Names longer than the field are rejected, never truncated.
    pub fn new(name: impl Into<String>) -> Result<Self, FramingError> {
        let name = name.into();
        if name.len() > WIDTH {
            return Err(FramingError::NameTooLong {
                length: name.len(),
                width: WIDTH,
            });
        }
        if name.contains('\0') {
            return Err(FramingError::MalformedName);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_wire(raw: &[u8]) -> Result<Self, FramingError> {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let (text, padding) = raw.split_at(end);
        if padding.iter().any(|&b| b != 0) {
            return Err(FramingError::MalformedName);
        }
        let text = std::str::from_utf8(text).map_err(|_| FramingError::MalformedName)?;
        Ok(Self(text.to_owned()))
    }

    fn write(&self, dst: &mut BytesMut) {
        dst.put_slice(self.0.as_bytes());
        dst.put_bytes(0, WIDTH - self.0.len());
    }
}

impl<const WIDTH: usize> TryFrom<&str> for FixedName<WIDTH> {
    type Error = FramingError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl<const WIDTH: usize> AsRef<str> for FixedName<WIDTH> {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<const WIDTH: usize> fmt::Display for FixedName<WIDTH> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<const WIDTH: usize> fmt::Debug for FixedName<WIDTH> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

/// Client → server messages ("thin" layouts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    DocCreate { name: DocumentName },
    DocOpen { name: DocumentName },
    DocSave { id: DocumentId },
    DocDelete { name: DocumentName },
    DocActivate { id: DocumentId, hash: Digest },
    SyncByte { byte: u8 },
    SyncMultibyte { bytes: Bytes },
    SyncCursor { position: u32 },
    SyncDeletion { position: u32, length: u32 },
    UserLogin { name: UserName, password_hash: Digest },
    UserLogout,
}

/// Server → client messages ("rich" layouts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Status { status: Status },
    DocCreate { status: Status, name: DocumentName },
    DocOpen { status: Status, id: DocumentId, name: DocumentName },
    DocSave { status: Status, id: DocumentId },
    DocDelete { status: Status, name: DocumentName },
    DocActivate { status: Status, id: DocumentId },
    SyncByte { position: u32, byte: u8 },
    SyncMultibyte { position: u32, bytes: Bytes },
    SyncCursor { position: u32 },
    SyncDeletion { position: u32, length: u32 },
    UserLogin { status: Status },
    UserJoin { id: UserId, name: UserName },
    UserQuit { id: UserId },
}

/// Result of parsing the front of a receive buffer.
#[derive(Debug)]
pub enum Parse<T> {
    /// Not enough bytes yet. `expected` is the total length known so far.
    Incomplete { expected: usize },
    Complete { message: T, consumed: usize },
    /// The message was framed but a field is invalid. `consumed` bytes belong
    /// to it, and `skip` more bytes still have to be discarded as they arrive.
    Rejected {
        error: FramingError,
        consumed: usize,
        skip: usize,
    },
}

/// A message with a fixed field schedule for one direction.
pub trait WireMessage: Sized {
    fn message_type(&self) -> MessageType;

    /// Parse one message from the front of `src` without consuming it.
    fn parse(src: &[u8], max_payload_len: usize) -> Result<Parse<Self>, CodecError>;

    fn encode(&self, dst: &mut BytesMut) -> Result<(), FramingError>;

    fn encoded_len(&self) -> usize;

    fn to_bytes(&self) -> Result<Bytes, FramingError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

enum Stop {
    Incomplete { expected: usize },
    InvalidType { tag: u8 },
}

enum Body<T> {
    Message(T),
    Rejected { error: FramingError, skip: usize },
}

impl<T> From<Result<T, FramingError>> for Body<T> {
    fn from(parsed: Result<T, FramingError>) -> Self {
        match parsed {
            Ok(message) => Self::Message(message),
            Err(error) => Self::Rejected { error, skip: 0 },
        }
    }
}

struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Stop> {
        let end = self.pos.saturating_add(len);
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(Stop::Incomplete { expected: end })?;
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], Stop> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, Stop> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, Stop> {
        Ok(u32::from_be_bytes(self.array::<SIZE_WIDTH>()?))
    }

    fn tag(&mut self, accepts: fn(MessageType) -> bool) -> Result<MessageType, Stop> {
        let tag = self.u8()?;
        MessageType::from_tag(tag)
            .filter(|ty| accepts(*ty))
            .ok_or(Stop::InvalidType { tag })
    }
}

fn run_parser<T>(
    src: &[u8],
    body: impl FnOnce(&mut WireReader<'_>) -> Result<Body<T>, Stop>,
) -> Result<Parse<T>, CodecError> {
    let mut reader = WireReader::new(src);
    match body(&mut reader) {
        Ok(Body::Message(message)) => Ok(Parse::Complete {
            message,
            consumed: reader.pos,
        }),
        Ok(Body::Rejected { error, skip }) => Ok(Parse::Rejected {
            error,
            consumed: reader.pos,
            skip,
        }),
        Err(Stop::Incomplete { expected }) => Ok(Parse::Incomplete { expected }),
        Err(Stop::InvalidType { tag }) => Err(CodecError::InvalidMessageType { tag }),
    }
}

fn oversized<T>(length: usize, limit: usize) -> Body<T> {
    Body::Rejected {
        error: FramingError::PayloadTooLarge { length, limit },
        skip: length,
    }
}

fn wire_length(bytes: &Bytes) -> Result<u32, FramingError> {
    u32::try_from(bytes.len()).map_err(|_| FramingError::PayloadTooLarge {
        length: bytes.len(),
        limit: u32::MAX as usize,
    })
}

impl InboundMessage {
    fn read(r: &mut WireReader<'_>, max_payload_len: usize) -> Result<Body<Self>, Stop> {
        let ty = r.tag(MessageType::is_request)?;
        let parsed = match ty {
            MessageType::DocCreate | MessageType::DocOpen | MessageType::DocDelete => {
                let raw = r.take(DOC_NAME_WIDTH)?;
                DocumentName::from_wire(raw).map(|name| match ty {
                    MessageType::DocCreate => Self::DocCreate { name },
                    MessageType::DocOpen => Self::DocOpen { name },
                    _ => Self::DocDelete { name },
                })
            }
            MessageType::DocSave => Ok(Self::DocSave {
                id: DocumentId(r.u32()?),
            }),
            MessageType::DocActivate => {
                let id = DocumentId(r.u32()?);
                let hash = Digest(r.array()?);
                Ok(Self::DocActivate { id, hash })
            }
            MessageType::SyncByte => Ok(Self::SyncByte { byte: r.u8()? }),
            MessageType::SyncMultibyte => {
                let length = r.u32()? as usize;
                if length > max_payload_len {
                    return Ok(oversized(length, max_payload_len));
                }
                let payload = r.take(length)?;
                Ok(Self::SyncMultibyte {
                    bytes: Bytes::copy_from_slice(payload),
                })
            }
            MessageType::SyncCursor => Ok(Self::SyncCursor { position: r.u32()? }),
            MessageType::SyncDeletion => {
                let position = r.u32()?;
                let length = r.u32()?;
                Ok(Self::SyncDeletion { position, length })
            }
            MessageType::UserLogin => {
                let raw = r.take(USER_NAME_WIDTH)?;
                let password_hash = Digest(r.array()?);
                UserName::from_wire(raw).map(|name| Self::UserLogin {
                    name,
                    password_hash,
                })
            }
            MessageType::UserLogout => Ok(Self::UserLogout),
            MessageType::Status | MessageType::UserJoin | MessageType::UserQuit => {
                return Err(Stop::InvalidType { tag: ty.tag() })
            }
        };
        Ok(parsed.into())
    }
}

impl WireMessage for InboundMessage {
    fn message_type(&self) -> MessageType {
        match self {
            Self::DocCreate { .. } => MessageType::DocCreate,
            Self::DocOpen { .. } => MessageType::DocOpen,
            Self::DocSave { .. } => MessageType::DocSave,
            Self::DocDelete { .. } => MessageType::DocDelete,
            Self::DocActivate { .. } => MessageType::DocActivate,
            Self::SyncByte { .. } => MessageType::SyncByte,
            Self::SyncMultibyte { .. } => MessageType::SyncMultibyte,
            Self::SyncCursor { .. } => MessageType::SyncCursor,
            Self::SyncDeletion { .. } => MessageType::SyncDeletion,
            Self::UserLogin { .. } => MessageType::UserLogin,
            Self::UserLogout => MessageType::UserLogout,
        }
    }

    fn parse(src: &[u8], max_payload_len: usize) -> Result<Parse<Self>, CodecError> {
        run_parser(src, |r| Self::read(r, max_payload_len))
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), FramingError> {
        let length = match self {
            Self::SyncMultibyte { bytes } => Some(wire_length(bytes)?),
            _ => None,
        };
        dst.reserve(self.encoded_len());
        dst.put_u8(self.message_type().tag());
        match self {
            Self::DocCreate { name } | Self::DocOpen { name } | Self::DocDelete { name } => {
                name.write(dst)
            }
            Self::DocSave { id } => dst.put_u32(id.0),
            Self::DocActivate { id, hash } => {
                dst.put_u32(id.0);
                dst.put_slice(&hash.0);
            }
            Self::SyncByte { byte } => dst.put_u8(*byte),
            Self::SyncMultibyte { bytes } => {
                dst.put_u32(length.unwrap_or_default());
                dst.put_slice(bytes);
            }
            Self::SyncCursor { position } => dst.put_u32(*position),
            Self::SyncDeletion { position, length } => {
                dst.put_u32(*position);
                dst.put_u32(*length);
            }
            Self::UserLogin {
                name,
                password_hash,
            } => {
                name.write(dst);
                dst.put_slice(&password_hash.0);
            }
            Self::UserLogout => {}
        }
        Ok(())
    }

    fn encoded_len(&self) -> usize {
        TYPE_WIDTH
            + match self {
                Self::DocCreate { .. } | Self::DocOpen { .. } | Self::DocDelete { .. } => {
                    DOC_NAME_WIDTH
                }
                Self::DocSave { .. } => ID_WIDTH,
                Self::DocActivate { .. } => ID_WIDTH + HASH_WIDTH,
                Self::SyncByte { .. } => SYNC_BYTE_WIDTH,
                Self::SyncMultibyte { bytes } => SIZE_WIDTH + bytes.len(),
                Self::SyncCursor { .. } => SIZE_WIDTH,
                Self::SyncDeletion { .. } => 2 * SIZE_WIDTH,
                Self::UserLogin { .. } => USER_NAME_WIDTH + HASH_WIDTH,
                Self::UserLogout => 0,
            }
    }
}

impl OutboundMessage {
    fn read(r: &mut WireReader<'_>, max_payload_len: usize) -> Result<Body<Self>, Stop> {
        let ty = r.tag(MessageType::is_response)?;
        let parsed = match ty {
            MessageType::Status => {
                Status::from_wire(r.u8()?).map(|status| Self::Status { status })
            }
            MessageType::DocCreate | MessageType::DocDelete => {
                let status = r.u8()?;
                let raw = r.take(DOC_NAME_WIDTH)?;
                Status::from_wire(status).and_then(|status| {
                    DocumentName::from_wire(raw).map(|name| {
                        if ty == MessageType::DocCreate {
                            Self::DocCreate { status, name }
                        } else {
                            Self::DocDelete { status, name }
                        }
                    })
                })
            }
            MessageType::DocOpen => {
                let status = r.u8()?;
                let id = DocumentId(r.u32()?);
                let raw = r.take(DOC_NAME_WIDTH)?;
                Status::from_wire(status).and_then(|status| {
                    DocumentName::from_wire(raw).map(|name| Self::DocOpen { status, id, name })
                })
            }
            MessageType::DocSave | MessageType::DocActivate => {
                let status = r.u8()?;
                let id = DocumentId(r.u32()?);
                Status::from_wire(status).map(|status| {
                    if ty == MessageType::DocSave {
                        Self::DocSave { status, id }
                    } else {
                        Self::DocActivate { status, id }
                    }
                })
            }
            MessageType::SyncByte => {
                let position = r.u32()?;
                let byte = r.u8()?;
                Ok(Self::SyncByte { position, byte })
            }
            MessageType::SyncMultibyte => {
                let position = r.u32()?;
                let length = r.u32()? as usize;
                if length > max_payload_len {
                    return Ok(oversized(length, max_payload_len));
                }
                let payload = r.take(length)?;
                Ok(Self::SyncMultibyte {
                    position,
                    bytes: Bytes::copy_from_slice(payload),
                })
            }
            MessageType::SyncCursor => Ok(Self::SyncCursor { position: r.u32()? }),
            MessageType::SyncDeletion => {
                let position = r.u32()?;
                let length = r.u32()?;
                Ok(Self::SyncDeletion { position, length })
            }
            MessageType::UserLogin => {
                Status::from_wire(r.u8()?).map(|status| Self::UserLogin { status })
            }
            MessageType::UserJoin => {
                let id = UserId(r.u32()?);
                let raw = r.take(USER_NAME_WIDTH)?;
                UserName::from_wire(raw).map(|name| Self::UserJoin { id, name })
            }
            MessageType::UserQuit => Ok(Self::UserQuit {
                id: UserId(r.u32()?),
            }),
            MessageType::UserLogout => return Err(Stop::InvalidType { tag: ty.tag() }),
        };
        Ok(parsed.into())
    }

    /// Reply carrying only a status, for requests that cannot be served.
    pub fn failure() -> Self {
        Self::Status {
            status: Status::Failure,
        }
    }
}

impl WireMessage for OutboundMessage {
    fn message_type(&self) -> MessageType {
        match self {
            Self::Status { .. } => MessageType::Status,
            Self::DocCreate { .. } => MessageType::DocCreate,
            Self::DocOpen { .. } => MessageType::DocOpen,
            Self::DocSave { .. } => MessageType::DocSave,
            Self::DocDelete { .. } => MessageType::DocDelete,
            Self::DocActivate { .. } => MessageType::DocActivate,
            Self::SyncByte { .. } => MessageType::SyncByte,
            Self::SyncMultibyte { .. } => MessageType::SyncMultibyte,
            Self::SyncCursor { .. } => MessageType::SyncCursor,
            Self::SyncDeletion { .. } => MessageType::SyncDeletion,
            Self::UserLogin { .. } => MessageType::UserLogin,
            Self::UserJoin { .. } => MessageType::UserJoin,
            Self::UserQuit { .. } => MessageType::UserQuit,
        }
    }

    fn parse(src: &[u8], max_payload_len: usize) -> Result<Parse<Self>, CodecError> {
        run_parser(src, |r| Self::read(r, max_payload_len))
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), FramingError> {
        let length = match self {
            Self::SyncMultibyte { bytes, .. } => Some(wire_length(bytes)?),
            _ => None,
        };
        dst.reserve(self.encoded_len());
        dst.put_u8(self.message_type().tag());

        // status or position first
        match self {
            Self::Status { status }
            | Self::DocCreate { status, .. }
            | Self::DocOpen { status, .. }
            | Self::DocSave { status, .. }
            | Self::DocDelete { status, .. }
            | Self::DocActivate { status, .. }
            | Self::UserLogin { status } => dst.put_u8(*status as u8),
            Self::SyncByte { position, .. }
            | Self::SyncMultibyte { position, .. }
            | Self::SyncCursor { position }
            | Self::SyncDeletion { position, .. } => dst.put_u32(*position),
            Self::UserJoin { id, .. } | Self::UserQuit { id } => dst.put_u32(id.0),
        }

        match self {
            Self::DocCreate { name, .. } | Self::DocDelete { name, .. } => name.write(dst),
            Self::DocOpen { id, name, .. } => {
                dst.put_u32(id.0);
                name.write(dst);
            }
            Self::DocSave { id, .. } | Self::DocActivate { id, .. } => dst.put_u32(id.0),
            Self::SyncByte { byte, .. } => dst.put_u8(*byte),
            Self::SyncMultibyte { bytes, .. } => {
                dst.put_u32(length.unwrap_or_default());
                dst.put_slice(bytes);
            }
            Self::SyncDeletion { length, .. } => dst.put_u32(*length),
            Self::UserJoin { name, .. } => name.write(dst),
            Self::Status { .. }
            | Self::SyncCursor { .. }
            | Self::UserLogin { .. }
            | Self::UserQuit { .. } => {}
        }
        Ok(())
    }

    fn encoded_len(&self) -> usize {
        TYPE_WIDTH
            + match self {
                Self::Status { .. } | Self::UserLogin { .. } => STATUS_WIDTH,
                Self::DocCreate { .. } | Self::DocDelete { .. } => STATUS_WIDTH + DOC_NAME_WIDTH,
                Self::DocOpen { .. } => STATUS_WIDTH + ID_WIDTH + DOC_NAME_WIDTH,
                Self::DocSave { .. } | Self::DocActivate { .. } => STATUS_WIDTH + ID_WIDTH,
                Self::SyncByte { .. } => SIZE_WIDTH + SYNC_BYTE_WIDTH,
                Self::SyncMultibyte { bytes, .. } => 2 * SIZE_WIDTH + bytes.len(),
                Self::SyncCursor { .. } => SIZE_WIDTH,
                Self::SyncDeletion { .. } => 2 * SIZE_WIDTH,
                Self::UserJoin { .. } => ID_WIDTH + USER_NAME_WIDTH,
                Self::UserQuit { .. } => ID_WIDTH,
            }
    }
}
