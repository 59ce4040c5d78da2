//! User accounts keyed by name, with SHA-1 password hashes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::info;
use thiserror::Error;

use crate::protocol::{Digest, UserId, UserName};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("user \"{0}\" does not exist")]
    UnknownUser(String),

    #[error("invalid password for user \"{0}\"")]
    InvalidPassword(String),

    #[error("user \"{0}\" already present")]
    AlreadyPresent(String),

    #[error("user \"{0}\" is already logged in")]
    AlreadyLoggedIn(String),

    #[error("too many users")]
    TooManyUsers,
}

pub trait UserDirectory: Send {
    /// Verify credentials and return the user's id.
    fn check(&self, name: &UserName, password_hash: &Digest) -> Result<UserId, AuthError>;

    fn create(&self, name: &UserName, password_hash: Digest) -> Result<UserId, AuthError>;

    fn create_with_password(&self, name: &UserName, password: &str) -> Result<UserId, AuthError> {
        self.create(name, Digest::of(password.as_bytes()))
    }

    fn remove(&self, name: &UserName) -> Result<UserId, AuthError>;
}

#[derive(Debug)]
struct Account {
    id: UserId,
    password_hash: Digest,
}

#[derive(Debug)]
struct Accounts {
    by_name: HashMap<String, Account>,
    next_id: u32,
}

/// In-memory accounts. Clones share the same accounts, so the console and
/// the coordinator see each other's changes.
#[derive(Debug, Clone)]
pub struct MemoryUserDirectory {
    accounts: Arc<Mutex<Accounts>>,
}

impl Default for MemoryUserDirectory {
    fn default() -> Self {
        Self {
            accounts: Arc::new(Mutex::new(Accounts {
                by_name: HashMap::new(),
                next_id: 1,
            })),
        }
    }
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &UserName) -> bool {
        self.lock().by_name.contains_key(name.as_str())
    }

    fn lock(&self) -> MutexGuard<'_, Accounts> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn check(&self, name: &UserName, password_hash: &Digest) -> Result<UserId, AuthError> {
        let accounts = self.lock();
        let account = accounts
            .by_name
            .get(name.as_str())
            .ok_or_else(|| AuthError::UnknownUser(name.to_string()))?;
        if account.password_hash != *password_hash {
            return Err(AuthError::InvalidPassword(name.to_string()));
        }
        Ok(account.id)
    }

    fn create(&self, name: &UserName, password_hash: Digest) -> Result<UserId, AuthError> {
        let mut accounts = self.lock();
        if accounts.by_name.contains_key(name.as_str()) {
            return Err(AuthError::AlreadyPresent(name.to_string()));
        }
        if accounts.next_id == u32::MAX {
            return Err(AuthError::TooManyUsers);
        }
        let id = UserId(accounts.next_id);
        accounts.next_id += 1;
        accounts
            .by_name
            .insert(name.to_string(), Account { id, password_hash });
        info!("added user \"{name}\" as {id}");
        Ok(id)
    }

    fn remove(&self, name: &UserName) -> Result<UserId, AuthError> {
        let account = self
            .lock()
            .by_name
            .remove(name.as_str())
            .ok_or_else(|| AuthError::UnknownUser(name.to_string()))?;
        info!("removed user \"{name}\"");
        Ok(account.id)
    }
}
