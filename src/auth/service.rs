//! Registration, login and token resolution.
//!
//! [`AuthService`] holds no state of its own beyond its collaborators. Every
//! failure a client can cause comes back as a typed [`AuthError`]; only
//! storage and hashing faults surface as [`AuthError::Internal`].

use super::hasher::CredentialHasher;
use super::registry::{NewPrincipal, PublicPrincipal, Registry, RegistryError};
use super::token::{TokenCodec, TokenError};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const BEARER_TOKEN_TYPE: &str = "bearer";

#[derive(Debug, Error)]
pub enum AuthError {
    /// Email or username already registered.
    #[error("user already exists")]
    Conflict,
    /// Unknown username, wrong password, or an invalid/expired token.
    #[error("unauthorized")]
    Unauthorized,
    /// The token was valid but its subject is no longer registered.
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<RegistryError> for AuthError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Duplicate => Self::Conflict,
            RegistryError::Storage(e) => Self::Internal(anyhow::anyhow!(e)),
        }
    }
}

/// A registration request. The password is plaintext until hashed.
#[derive(Clone)]
pub struct Registration {
    pub email: String,
    pub username: String,
    pub password: String,
    pub full_name: String,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("full_name", &self.full_name)
            .finish()
    }
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: &'static str,
}

pub struct AuthService {
    registry: Arc<dyn Registry>,
    hasher: CredentialHasher,
    tokens: TokenCodec,
    login_ttl: Duration,
}

impl AuthService {
    /// Login tokens use the codec's default TTL.
    pub fn new(registry: Arc<dyn Registry>, hasher: CredentialHasher, tokens: TokenCodec) -> Self {
        let login_ttl = tokens.default_ttl();
        Self {
            registry,
            hasher,
            tokens,
            login_ttl,
        }
    }

    pub fn login_ttl(&self) -> Duration {
        self.login_ttl
    }

    /// Hash the password and insert the principal.
    pub fn register(&self, registration: Registration) -> Result<PublicPrincipal, AuthError> {
        let verifier = self
            .hasher
            .hash(&registration.password)
            .map_err(anyhow::Error::from)?;

        let stored = self
            .registry
            .insert(NewPrincipal {
                email: registration.email,
                username: registration.username,
                full_name: registration.full_name,
                verifier,
            })
            .inspect_err(|e| {
                if matches!(e, RegistryError::Duplicate) {
                    tracing::info!("Registration rejected: principal already exists");
                }
            })?;

        tracing::info!(id = stored.id, username = %stored.username, "Principal registered");
        Ok(stored.into())
    }

    /// Check a username/password pair and issue a bearer token.
    pub fn login(&self, username: &str, password: &str) -> Result<AccessToken, AuthError> {
        let Some(principal) = self.registry.find_by_handle(username)? else {
            self.hasher.verify_absent(password);
            tracing::info!("Login failed");
            return Err(AuthError::Unauthorized);
        };

        if !self.hasher.verify(password, &principal.verifier) {
            tracing::info!("Login failed");
            return Err(AuthError::Unauthorized);
        }

        let access_token = self
            .tokens
            .issue(&principal.username, self.login_ttl)
            .map_err(anyhow::Error::from)?;

        tracing::info!(username = %principal.username, "Login succeeded");
        Ok(AccessToken {
            access_token,
            token_type: BEARER_TOKEN_TYPE,
        })
    }

    /// Return the principal a token was issued for.
    pub fn resolve(&self, token: &str) -> Result<PublicPrincipal, AuthError> {
        let subject = self.authenticate(token)?;
        self.registry
            .find_by_handle(&subject)?
            .map(PublicPrincipal::from)
            .ok_or_else(|| {
                tracing::warn!(username = %subject, "Valid token for unknown principal");
                AuthError::NotFound
            })
    }

    /// List every principal, gated on a valid token.
    pub fn list_all(&self, token: &str) -> Result<Vec<PublicPrincipal>, AuthError> {
        self.authenticate(token)?;
        Ok(self
            .registry
            .list()?
            .into_iter()
            .map(PublicPrincipal::from)
            .collect())
    }

    /// Register a principal unless its username is already taken.
    /// Returns `true` if it was created.
    pub fn seed(&self, registration: Registration) -> Result<bool, AuthError> {
        if self.registry.find_by_handle(&registration.username)?.is_some() {
            return Ok(false);
        }
        match self.register(registration) {
            Ok(_) => Ok(true),
            Err(AuthError::Conflict) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn authenticate(&self, token: &str) -> Result<String, AuthError> {
        match self.tokens.verify(token) {
            Ok(claims) => Ok(claims.sub),
            Err(TokenError::Expired) => {
                tracing::debug!("Rejected expired token");
                Err(AuthError::Unauthorized)
            }
            Err(_) => Err(AuthError::Unauthorized),
        }
    }
}

impl fmt::Debug for AuthService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthService")
            .field("tokens", &self.tokens)
            .field("login_ttl", &self.login_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_service() -> AuthService {
    use super::registry::MemoryRegistry;
    use super::token::DEFAULT_TOKEN_TTL;

    AuthService::new(
        Arc::new(MemoryRegistry::new()),
        super::hasher::fast_hasher(),
        TokenCodec::new(b"service-test-signing-key", DEFAULT_TOKEN_TTL),
    )
}

#[cfg(test)]
pub(crate) fn alice() -> Registration {
    Registration {
        email: "a@x.com".into(),
        username: "alice".into(),
        password: "pw123".into(),
        full_name: "Alice".into(),
    }
}
