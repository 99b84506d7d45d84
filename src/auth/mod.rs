//! Identity core: credential hashing, principal registry, bearer tokens.
//!
//! Provides:
//! - Password hashing with Argon2id (random salt per hash, PHC verifiers)
//! - A principal registry with unique email and username, in memory or SQLite
//! - HS256-signed, self-contained bearer tokens with an expiry claim
//! - [`AuthService`], which composes the three into register/login/resolve/list
//!
//! ## Design Decisions
//! - Tokens are stateless: nothing is stored server-side, so there is no
//!   revocation. A token is good until its `exp`.
//! - Login failures never say whether the username exists.

pub mod hasher;
pub mod registry;
pub mod service;
pub mod store;
pub mod token;

pub use hasher::{CredentialHasher, CredentialVerifier, HashError};
pub use registry::{
    MemoryRegistry, NewPrincipal, Principal, PublicPrincipal, Registry, RegistryError,
};
pub use service::{AccessToken, AuthError, AuthService, Registration, BEARER_TOKEN_TYPE};
pub use store::SqliteRegistry;
pub use token::{ClaimSet, TokenCodec, TokenError, DEFAULT_TOKEN_TTL};
