//! Argon2id credential hashing.
//!
//! Verifiers are PHC strings (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`),
//! so every verifier carries its own salt and cost parameters. Raising the
//! configured cost only affects newly hashed secrets; old verifiers keep
//! verifying with the parameters they were created with.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Secret hashed once to produce the dummy verifier used for unknown users.
const DUMMY_SECRET: &str = "authkeeper-timing-equalizer";

#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid hashing parameters: {0}")]
    InvalidParams(String),
    #[error("credential hashing failed: {0}")]
    Hashing(String),
}

/// Stored form of a secret. Opaque outside this module.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialVerifier(String);

impl CredentialVerifier {
    /// Wrap a verifier loaded from storage.
    pub fn from_stored(phc: impl Into<String>) -> Self {
        Self(phc.into())
    }

    /// Encoded form for persistence. Never hand this to a client.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialVerifier([REDACTED])")
    }
}

/// One-way secret hasher with an adaptive cost factor.
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    dummy: OnceLock<Option<CredentialVerifier>>,
}

impl CredentialHasher {
    /// Hasher with the argon2 crate's default Argon2id parameters.
    pub fn new() -> Self {
        Self {
            argon2: Argon2::default(),
            dummy: OnceLock::new(),
        }
    }

    /// Hasher with explicit cost parameters.
    pub fn with_params(
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
    ) -> Result<Self, HashError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| HashError::InvalidParams(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            dummy: OnceLock::new(),
        })
    }

    /// Hash a secret with a fresh random salt.
    pub fn hash(&self, secret: &str) -> Result<CredentialVerifier, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let phc = self
            .argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| HashError::Hashing(e.to_string()))?;
        Ok(CredentialVerifier(phc.to_string()))
    }

    /// Check a secret against a stored verifier.
    ///
    /// Returns `false` for a mismatch and for a verifier that does not parse.
    pub fn verify(&self, secret: &str, verifier: &CredentialVerifier) -> bool {
        let Ok(parsed) = PasswordHash::new(verifier.as_str()) else {
            tracing::warn!("Stored credential verifier is not a valid PHC string");
            return false;
        };
        self.argon2
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }

    /// Spend the same work as a real verification when there is nothing to
    /// verify against, so unknown usernames are not distinguishable by timing.
    pub fn verify_absent(&self, secret: &str) {
        let dummy = self.dummy.get_or_init(|| self.hash(DUMMY_SECRET).ok());
        if let Some(verifier) = dummy {
            let _ = self.verify(secret, verifier);
        }
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialHasher").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn fast_hasher() -> CredentialHasher {
    // Minimum cost keeps the test suite quick.
    CredentialHasher::with_params(Params::MIN_M_COST, Params::MIN_T_COST, 1).unwrap()
}
