//! Signed bearer tokens.
//!
//! Tokens are compact HS256 JWS strings carrying a [`ClaimSet`]. The codec
//! checks structure and signature before it looks at expiry, and reports the
//! two failure classes separately so callers may tell them apart.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default token lifetime: 30 minutes.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Malformed token, wrong algorithm or bad signature.
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("token encoding failed: {0}")]
    Encoding(String),
}

/// Payload carried inside a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    /// Username of the authenticated principal.
    pub sub: String,
    /// Expiry, Unix seconds.
    pub exp: i64,
    /// Issue time, Unix seconds.
    #[serde(default)]
    pub iat: i64,
}

impl ClaimSet {
    pub fn subject(&self) -> &str {
        &self.sub
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Issues and verifies tokens with one process-wide HMAC key.
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    default_ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: &[u8], default_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked in `verify` so the boundary has no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Sign a claim set for `subject` that expires `ttl` from now.
    pub fn issue(&self, subject: &str, ttl: Duration) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = ClaimSet {
            sub: subject.to_owned(),
            exp: now.saturating_add(ttl_secs),
            iat: now,
        };
        self.sign(&claims)
    }

    pub fn issue_default(&self, subject: &str) -> Result<String, TokenError> {
        self.issue(subject, self.default_ttl)
    }

    /// Decode a token, checking signature first and expiry second.
    pub fn verify(&self, token: &str) -> Result<ClaimSet, TokenError> {
        let data = decode::<ClaimSet>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!(reason = %e, "Rejected bearer token");
            TokenError::Invalid
        })?;

        if data.claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(data.claims)
    }

    pub(crate) fn sign(&self, claims: &ClaimSet) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &Algorithm::HS256)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}
