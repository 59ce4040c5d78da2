//! Interprets requests against the document and user collaborators.
//!
//! Per-client state machine:
//!
//! ```text
//!   CONNECTED ──USER_LOGIN──► AUTHENTICATING ──ok──► ACTIVE(None)
//!       ▲                          │                    │  ▲
//!       └────────── rejected ──────┘        DOC_OPEN /  │  │ DOC_DELETE of
//!                                           DOC_ACTIVATE▼  │ the active doc
//!                                                   ACTIVE(Some(id))
//!
//!   any state ──USER_LOGOUT / socket closed──► CLOSED (entry dropped)
//! ```
//!
//! Sync operations carry no position on the way in. Each session keeps a
//! cursor: `SYNC_CURSOR` and `SYNC_DELETION` move it, inserts are stamped with
//! it and advance it past the inserted bytes. Opening or activating a document
//! resets it to 0. Relayed operations reach every other active session on the
//! same document (or every other session without one).

use std::collections::HashMap;

use bytes::Bytes;
use log::{debug, info};

use crate::connection::ClientId;
use crate::error::HandlerError;
use crate::protocol::{
    Digest, DocumentId, DocumentName, InboundMessage, OutboundMessage, Status, UserId, UserName,
};
use crate::registry::Envelope;
use crate::server::{Dispatch, MessageHandler};
use crate::storage::{AuthError, DocumentStore, Edit, UserDirectory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub user: UserId,
    pub name: UserName,
    pub document: Option<DocumentId>,
    pub cursor: u32,
}

impl ActiveSession {
    fn new(user: UserId, name: UserName) -> Self {
        Self {
            user,
            name,
            document: None,
            cursor: 0,
        }
    }

    fn focus(&mut self, document: Option<DocumentId>) {
        self.document = document;
        self.cursor = 0;
    }

    /// Turn a sync request into the relayed message and the edit it makes,
    /// updating the cursor. `None` for non-sync messages.
    pub fn relay(&mut self, message: &InboundMessage) -> Option<(OutboundMessage, Option<Edit>)> {
        let position = self.cursor;
        let relayed = match message {
            InboundMessage::SyncByte { byte } => {
                self.cursor = position.saturating_add(1);
                let edit = Edit::Insert {
                    position,
                    bytes: Bytes::copy_from_slice(&[*byte]),
                };
                (OutboundMessage::SyncByte { position, byte: *byte }, Some(edit))
            }
            InboundMessage::SyncMultibyte { bytes } => {
                let length = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
                self.cursor = position.saturating_add(length);
                let edit = Edit::Insert {
                    position,
                    bytes: bytes.clone(),
                };
                let out = OutboundMessage::SyncMultibyte {
                    position,
                    bytes: bytes.clone(),
                };
                (out, Some(edit))
            }
            InboundMessage::SyncCursor { position } => {
                self.cursor = *position;
                (OutboundMessage::SyncCursor { position: *position }, None)
            }
            InboundMessage::SyncDeletion { position, length } => {
                self.cursor = *position;
                let edit = Edit::Delete {
                    position: *position,
                    length: *length,
                };
                let out = OutboundMessage::SyncDeletion {
                    position: *position,
                    length: *length,
                };
                (out, Some(edit))
            }
            _ => return None,
        };
        Some(relayed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Authenticating,
    Active(ActiveSession),
}

pub struct SyncCoordinator<D, U> {
    documents: D,
    users: U,
    sessions: HashMap<ClientId, SessionState>,
}

impl<D: DocumentStore, U: UserDirectory> SyncCoordinator<D, U> {
    pub fn new(documents: D, users: U) -> Self {
        Self {
            documents,
            users,
            sessions: HashMap::new(),
        }
    }

    pub fn session(&self, client: ClientId) -> Option<&SessionState> {
        self.sessions.get(&client)
    }

    pub fn documents(&self) -> &D {
        &self.documents
    }

    pub fn users(&self) -> &U {
        &self.users
    }

    /// Logged-in users, in no particular order.
    pub fn active_users(&self) -> impl Iterator<Item = (UserId, &UserName)> + '_ {
        self.sessions.values().filter_map(|state| match state {
            SessionState::Active(session) => Some((session.user, &session.name)),
            _ => None,
        })
    }

    fn active(&self, client: ClientId) -> Option<&ActiveSession> {
        match self.sessions.get(&client) {
            Some(SessionState::Active(session)) => Some(session),
            _ => None,
        }
    }

    fn active_mut(&mut self, client: ClientId) -> Option<&mut ActiveSession> {
        match self.sessions.get_mut(&client) {
            Some(SessionState::Active(session)) => Some(session),
            _ => None,
        }
    }

    fn login(
        &mut self,
        ctx: &mut Dispatch<'_>,
        origin: ClientId,
        name: &UserName,
        password_hash: &Digest,
    ) -> Result<(), HandlerError> {
        let result = self.authenticate(origin, name, password_hash);
        let status = Status::from(result.is_ok());
        ctx.registry()
            .send(origin, &OutboundMessage::UserLogin { status })?;

        let user = result?;
        info!("client {origin} logged in as \"{name}\" ({user})");
        ctx.registry().broadcast(
            &OutboundMessage::UserJoin {
                id: user,
                name: name.clone(),
            },
            Some(origin),
        )?;
        Ok(())
    }

    fn authenticate(
        &mut self,
        origin: ClientId,
        name: &UserName,
        password_hash: &Digest,
    ) -> Result<UserId, AuthError> {
        if self.active(origin).is_some() || self.active_users().any(|(_, n)| n == name) {
            return Err(AuthError::AlreadyLoggedIn(name.to_string()));
        }

        self.sessions.insert(origin, SessionState::Authenticating);
        match self.users.check(name, password_hash) {
            Ok(user) => {
                let session = ActiveSession::new(user, name.clone());
                self.sessions.insert(origin, SessionState::Active(session));
                Ok(user)
            }
            Err(error) => {
                self.sessions.insert(origin, SessionState::Connected);
                Err(error)
            }
        }
    }

    fn logout(&mut self, ctx: &mut Dispatch<'_>, origin: ClientId) -> Result<(), HandlerError> {
        // dropped before removal so the disconnect callback has nothing left to announce
        let state = self.sessions.remove(&origin);
        ctx.registry().remove(origin);
        if let Some(SessionState::Active(session)) = state {
            info!("user \"{}\" logged out", session.name);
            ctx.registry()
                .broadcast(&OutboundMessage::UserQuit { id: session.user }, None)?;
        }
        Ok(())
    }

    fn handle_document(
        &mut self,
        ctx: &mut Dispatch<'_>,
        origin: ClientId,
        message: &InboundMessage,
    ) -> Result<(), HandlerError> {
        match message {
            InboundMessage::DocCreate { name } => {
                let result = self.documents.create(name);
                let status = Status::from(result.is_ok());
                ctx.registry().send(
                    origin,
                    &OutboundMessage::DocCreate {
                        status,
                        name: name.clone(),
                    },
                )?;
                let handle = result?;
                debug!("client {origin} created \"{name}\" as {}", handle.id);
            }
            InboundMessage::DocOpen { name } => self.open(ctx, origin, name)?,
            InboundMessage::DocSave { id } => {
                let result = self.documents.save(*id);
                let status = Status::from(result.is_ok());
                ctx.registry()
                    .send(origin, &OutboundMessage::DocSave { status, id: *id })?;
                let handle = result?;
                debug!("document {id} saved with hash {}", handle.hash);
            }
            InboundMessage::DocDelete { name } => {
                let result = self.documents.remove(name);
                let status = Status::from(result.is_ok());
                if let Ok(Some(id)) = result {
                    self.detach(id);
                }
                ctx.registry().send(
                    origin,
                    &OutboundMessage::DocDelete {
                        status,
                        name: name.clone(),
                    },
                )?;
                result?;
            }
            InboundMessage::DocActivate { id, hash } => self.activate(ctx, origin, *id, hash)?,
            _ => {}
        }
        Ok(())
    }

    fn open(
        &mut self,
        ctx: &mut Dispatch<'_>,
        origin: ClientId,
        name: &DocumentName,
    ) -> Result<(), HandlerError> {
        let handle = match self.documents.open(name) {
            Ok(handle) => handle,
            Err(error) => {
                ctx.registry().send(
                    origin,
                    &OutboundMessage::DocOpen {
                        status: Status::Failure,
                        id: DocumentId::default(),
                        name: name.clone(),
                    },
                )?;
                return Err(error.into());
            }
        };

        if let Some(session) = self.active_mut(origin) {
            session.focus(Some(handle.id));
        }
        ctx.registry().send(
            origin,
            &OutboundMessage::DocOpen {
                status: Status::Success,
                id: handle.id,
                name: name.clone(),
            },
        )?;

        let contents = self.documents.contents(handle.id)?;
        if !contents.is_empty() {
            let bytes = Bytes::copy_from_slice(contents);
            ctx.registry().send(
                origin,
                &OutboundMessage::SyncMultibyte { position: 0, bytes },
            )?;
        }
        Ok(())
    }

    fn activate(
        &mut self,
        ctx: &mut Dispatch<'_>,
        origin: ClientId,
        id: DocumentId,
        hash: &Digest,
    ) -> Result<(), HandlerError> {
        let current = self.documents.hash(id);
        let matches = matches!(&current, Ok(current) if current == hash);
        if matches {
            if let Some(session) = self.active_mut(origin) {
                session.focus(Some(id));
            }
        } else if let Ok(current) = &current {
            debug!("client {origin} has stale copy of document {id}: {hash} != {current}");
        }

        let status = Status::from(matches);
        ctx.registry()
            .send(origin, &OutboundMessage::DocActivate { status, id })?;
        current?;
        Ok(())
    }

    /// Return every session editing `id` to the lobby.
    fn detach(&mut self, id: DocumentId) {
        for state in self.sessions.values_mut() {
            if let SessionState::Active(session) = state {
                if session.document == Some(id) {
                    session.focus(None);
                }
            }
        }
    }

    fn relay(
        &mut self,
        ctx: &mut Dispatch<'_>,
        origin: ClientId,
        message: &InboundMessage,
    ) -> Result<(), HandlerError> {
        let Some(session) = self.active_mut(origin) else {
            return Ok(());
        };
        let document = session.document;
        let Some((relayed, edit)) = session.relay(message) else {
            return Ok(());
        };

        if let (Some(id), Some(edit)) = (document, &edit) {
            self.documents.apply(id, edit)?;
        }

        let recipients: Vec<ClientId> = self
            .sessions
            .iter()
            .filter(|(client, state)| {
                **client != origin
                    && matches!(state, SessionState::Active(other) if other.document == document)
            })
            .map(|(client, _)| *client)
            .collect();
        ctx.registry().multicast(recipients, &relayed)?;
        Ok(())
    }
}

impl<D: DocumentStore, U: UserDirectory> MessageHandler for SyncCoordinator<D, U> {
    fn on_message(
        &mut self,
        ctx: &mut Dispatch<'_>,
        envelope: &Envelope,
    ) -> Result<(), HandlerError> {
        let origin = envelope.origin;
        self.sessions
            .entry(origin)
            .or_insert(SessionState::Connected);

        match &envelope.message {
            InboundMessage::UserLogin {
                name,
                password_hash,
            } => self.login(ctx, origin, name, password_hash),
            InboundMessage::UserLogout => self.logout(ctx, origin),
            message => {
                if self.active(origin).is_none() {
                    debug!("client {origin} is not logged in, refusing {:?}", message);
                    ctx.registry().send(origin, &OutboundMessage::failure())?;
                    return Ok(());
                }
                match message {
                    InboundMessage::SyncByte { .. }
                    | InboundMessage::SyncMultibyte { .. }
                    | InboundMessage::SyncCursor { .. }
                    | InboundMessage::SyncDeletion { .. } => self.relay(ctx, origin, message),
                    _ => self.handle_document(ctx, origin, message),
                }
            }
        }
    }

    fn on_disconnect(&mut self, ctx: &mut Dispatch<'_>, client: ClientId) -> Result<(), HandlerError> {
        if let Some(SessionState::Active(session)) = self.sessions.remove(&client) {
            info!("user \"{}\" disconnected", session.name);
            ctx.registry()
                .broadcast(&OutboundMessage::UserQuit { id: session.user }, None)?;
        }
        Ok(())
    }
}
