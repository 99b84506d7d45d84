//! Principal registry: the set of registered identities.
//!
//! Both `email` and `username` are unique, compared as exact strings. The
//! uniqueness check, id assignment and append happen under one lock, so two
//! concurrent registrations for the same name cannot both succeed.

use super::hasher::CredentialVerifier;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Email or username already registered. Deliberately does not say which.
    #[error("principal already exists")]
    Duplicate,
    /// Backend failure. Each backend boxes its own error type.
    #[error("registry storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A principal about to be inserted. The secret is already hashed.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub verifier: CredentialVerifier,
}

/// A registered identity.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub verifier: CredentialVerifier,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

/// Everything about a principal except its verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicPrincipal {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "is_active")]
    pub active: bool,
}

impl From<&Principal> for PublicPrincipal {
    fn from(p: &Principal) -> Self {
        Self {
            id: p.id,
            email: p.email.clone(),
            username: p.username.clone(),
            full_name: p.full_name.clone(),
            created_at: p.created_at,
            active: p.active,
        }
    }
}

impl From<Principal> for PublicPrincipal {
    fn from(p: Principal) -> Self {
        Self {
            id: p.id,
            email: p.email,
            username: p.username,
            full_name: p.full_name,
            created_at: p.created_at,
            active: p.active,
        }
    }
}

/// Storage contract for principals.
pub trait Registry: Send + Sync {
    /// Insert a principal, rejecting any email or username collision
    /// without mutating the registry.
    fn insert(&self, candidate: NewPrincipal) -> Result<Principal, RegistryError>;

    fn find_by_handle(&self, username: &str) -> Result<Option<Principal>, RegistryError>;

    /// All principals in insertion order.
    fn list(&self) -> Result<Vec<Principal>, RegistryError>;

    fn len(&self) -> Result<usize, RegistryError>;

    fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.len()? == 0)
    }
}

#[derive(Default)]
struct MemoryState {
    principals: Vec<Principal>,
    by_email: HashMap<String, usize>,
    by_username: HashMap<String, usize>,
    last_id: i64,
}

/// Process-local registry. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<MemoryState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for MemoryRegistry {
    fn insert(&self, candidate: NewPrincipal) -> Result<Principal, RegistryError> {
        let mut state = self.state.lock();

        if state.by_email.contains_key(&candidate.email)
            || state.by_username.contains_key(&candidate.username)
        {
            return Err(RegistryError::Duplicate);
        }

        state.last_id += 1;
        let principal = Principal {
            id: state.last_id,
            email: candidate.email,
            username: candidate.username,
            full_name: candidate.full_name,
            verifier: candidate.verifier,
            created_at: Utc::now(),
            active: true,
        };

        let slot = state.principals.len();
        state.by_email.insert(principal.email.clone(), slot);
        state.by_username.insert(principal.username.clone(), slot);
        state.principals.push(principal.clone());

        Ok(principal)
    }

    fn find_by_handle(&self, username: &str) -> Result<Option<Principal>, RegistryError> {
        let state = self.state.lock();
        Ok(state
            .by_username
            .get(username)
            .map(|&slot| state.principals[slot].clone()))
    }

    fn list(&self) -> Result<Vec<Principal>, RegistryError> {
        Ok(self.state.lock().principals.clone())
    }

    fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.state.lock().principals.len())
    }
}

#[cfg(test)]
pub(crate) fn candidate(email: &str, username: &str) -> NewPrincipal {
    NewPrincipal {
        email: email.into(),
        username: username.into(),
        full_name: format!("{username} Example"),
        verifier: CredentialVerifier::from_stored("$argon2id$v=19$m=8,t=1,p=1$c2FsdHNhbHQ$aGFzaA"),
    }
}
