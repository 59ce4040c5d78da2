//! Document and user collaborators consumed by the sync coordinator.
//!
//! ```text
//! ┌─────────────────┐   create/open/save/remove   ┌─────────────────────┐
//! │ SyncCoordinator │ ──────────────────────────► │ DocumentStore       │
//! │                 │   hash/contents/apply       │ (MemoryDocumentStore)│
//! │                 │                             └─────────────────────┘
//! │                 │   check                     ┌─────────────────────┐
//! │                 │ ──────────────────────────► │ UserDirectory       │ ◄── Console
//! └─────────────────┘                             │ (MemoryUserDirectory)│   useradd/userdel
//!                                                 └─────────────────────┘
//! ```
//!
//! Both are called synchronously from the event loop, so implementations must
//! keep their calls short.

pub mod documents;
pub mod users;

pub use documents::{DocumentError, DocumentHandle, DocumentStore, Edit, MemoryDocumentStore};
pub use users::{AuthError, MemoryUserDirectory, UserDirectory};
