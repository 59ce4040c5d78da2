//! Named byte documents.
//!
//! A document exists by name once created. Opening it assigns a 32-bit id
//! that stays valid until the document is removed; every client opening the
//! same name shares that id. Edits change the working contents, `save` copies
//! them to the stored snapshot.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use log::debug;
use thiserror::Error;

use crate::protocol::{Digest, DocumentId, DocumentName};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("document \"{0}\" already exists")]
    AlreadyExists(String),

    #[error("document \"{0}\" does not exist")]
    NotFound(String),

    #[error("no open document with id {0}")]
    UnknownId(DocumentId),
}

/// Identifier plus content hash, compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle {
    pub id: DocumentId,
    pub hash: Digest,
}

/// A change to a document's working contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Insert { position: u32, bytes: Bytes },
    Delete { position: u32, length: u32 },
}

impl Edit {
    /// Apply to `contents`. Inserts past the end append; deletions are
    /// clamped to what exists.
    pub fn apply_to(&self, contents: &mut Vec<u8>) {
        match self {
            Self::Insert { position, bytes } => {
                let at = (*position as usize).min(contents.len());
                contents.splice(at..at, bytes.iter().copied());
            }
            Self::Delete { position, length } => {
                let start = (*position as usize).min(contents.len());
                let end = start.saturating_add(*length as usize).min(contents.len());
                contents.drain(start..end);
            }
        }
    }
}

pub trait DocumentStore: Send {
    /// Create an empty document and open it.
    fn create(&mut self, name: &DocumentName) -> Result<DocumentHandle, DocumentError>;

    /// Open an existing document, reusing its id if already open.
    fn open(&mut self, name: &DocumentName) -> Result<DocumentHandle, DocumentError>;

    /// Persist the working contents of an open document.
    fn save(&mut self, id: DocumentId) -> Result<DocumentHandle, DocumentError>;

    /// Delete a document. Returns the id it was open under, if any.
    fn remove(&mut self, name: &DocumentName) -> Result<Option<DocumentId>, DocumentError>;

    fn hash(&self, id: DocumentId) -> Result<Digest, DocumentError>;

    fn contents(&self, id: DocumentId) -> Result<&[u8], DocumentError>;

    fn apply(&mut self, id: DocumentId, edit: &Edit) -> Result<(), DocumentError>;

    /// Names of every existing document, sorted.
    fn list(&self) -> Vec<String>;
}

#[derive(Debug)]
struct OpenDocument {
    name: String,
    contents: Vec<u8>,
}

/// Keeps stored snapshots and open working copies in memory.
///
/// There is no close operation: a document's working copy and id stay
/// resident for the life of the store, until the document is removed.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    saved: BTreeMap<String, Vec<u8>>,
    open: HashMap<DocumentId, OpenDocument>,
    by_name: HashMap<String, DocumentId>,
    next_id: u32,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start id allocation at `first`. Ids wrap around at `u32::MAX`.
    pub fn with_first_id(first: u32) -> Self {
        Self {
            next_id: first,
            ..Self::default()
        }
    }

    fn allocate_id(&mut self) -> DocumentId {
        loop {
            let id = DocumentId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if !self.open.contains_key(&id) {
                return id;
            }
        }
    }

    fn load(&mut self, name: &str) -> DocumentHandle {
        if let Some(&id) = self.by_name.get(name) {
            return self.handle(id);
        }
        let contents = self.saved.get(name).cloned().unwrap_or_default();
        let id = self.allocate_id();
        debug!("document \"{name}\" opened as {id}");
        self.open.insert(
            id,
            OpenDocument {
                name: name.to_owned(),
                contents,
            },
        );
        self.by_name.insert(name.to_owned(), id);
        self.handle(id)
    }

    fn handle(&self, id: DocumentId) -> DocumentHandle {
        let hash = self
            .open
            .get(&id)
            .map(|doc| Digest::of(&doc.contents))
            .unwrap_or_default();
        DocumentHandle { id, hash }
    }

    fn document(&self, id: DocumentId) -> Result<&OpenDocument, DocumentError> {
        self.open.get(&id).ok_or(DocumentError::UnknownId(id))
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn create(&mut self, name: &DocumentName) -> Result<DocumentHandle, DocumentError> {
        if self.saved.contains_key(name.as_str()) {
            return Err(DocumentError::AlreadyExists(name.to_string()));
        }
        self.saved.insert(name.to_string(), Vec::new());
        Ok(self.load(name.as_str()))
    }

    fn open(&mut self, name: &DocumentName) -> Result<DocumentHandle, DocumentError> {
        if !self.saved.contains_key(name.as_str()) {
            return Err(DocumentError::NotFound(name.to_string()));
        }
        Ok(self.load(name.as_str()))
    }

    fn save(&mut self, id: DocumentId) -> Result<DocumentHandle, DocumentError> {
        let doc = self.document(id)?;
        let hash = Digest::of(&doc.contents);
        let (name, contents) = (doc.name.clone(), doc.contents.clone());
        self.saved.insert(name, contents);
        Ok(DocumentHandle { id, hash })
    }

    fn remove(&mut self, name: &DocumentName) -> Result<Option<DocumentId>, DocumentError> {
        if self.saved.remove(name.as_str()).is_none() {
            return Err(DocumentError::NotFound(name.to_string()));
        }
        let id = self.by_name.remove(name.as_str());
        if let Some(id) = id {
            self.open.remove(&id);
        }
        Ok(id)
    }

    fn hash(&self, id: DocumentId) -> Result<Digest, DocumentError> {
        self.document(id).map(|doc| Digest::of(&doc.contents))
    }

    fn contents(&self, id: DocumentId) -> Result<&[u8], DocumentError> {
        self.document(id).map(|doc| doc.contents.as_slice())
    }

    fn apply(&mut self, id: DocumentId, edit: &Edit) -> Result<(), DocumentError> {
        let doc = self.open.get_mut(&id).ok_or(DocumentError::UnknownId(id))?;
        edit.apply_to(&mut doc.contents);
        Ok(())
    }

    fn list(&self) -> Vec<String> {
        self.saved.keys().cloned().collect()
    }
}
