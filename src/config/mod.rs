//! Service configuration: `config.toml` plus environment overrides.
//!
//! ```toml
//! environment = "production"
//!
//! [gateway]
//! host = "127.0.0.1"
//! port = 3001
//!
//! [auth]
//! token_ttl_minutes = 30
//!
//! [storage]
//! backend = "sqlite"
//! path = "/var/lib/authkeeper/principals.db"
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Signing key used when none is configured. Only acceptable for local development.
pub const DEV_SIGNING_KEY: &str = "your-secret-key-change-in-production";

/// Keys shorter than this get a startup warning.
pub const MIN_SIGNING_KEY_BYTES: usize = 32;

pub const ENV_SIGNING_KEY: &str = "JWT_SECRET_KEY";
pub const ENV_ENVIRONMENT: &str = "ENVIRONMENT";
pub const ENV_HOST: &str = "AUTHKEEPER_HOST";
pub const ENV_PORT: &str = "AUTHKEEPER_PORT";
pub const ENV_DB_PATH: &str = "AUTHKEEPER_DB_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `development` or `production`. Production refuses the dev signing key.
    pub environment: String,
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".into(),
            gateway: GatewayConfig::default(),
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Allow binding a non-loopback address.
    pub allow_public_bind: bool,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3001,
            allow_public_bind: false,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC signing key for bearer tokens. Prefer `JWT_SECRET_KEY`.
    #[serde(skip_serializing)]
    pub signing_key: Option<String>,
    pub token_ttl_minutes: u64,
    /// Argon2 memory cost in KiB. `None` uses the library default.
    pub hash_memory_kib: Option<u32>,
    pub hash_iterations: Option<u32>,
    pub hash_parallelism: Option<u32>,
    /// Account created at startup if its username is free.
    #[serde(skip_serializing)]
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_key: None,
            token_ttl_minutes: 30,
            hash_memory_kib: None,
            hash_iterations: None,
            hash_parallelism: None,
            bootstrap_admin: None,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("signing_key", &self.signing_key.as_ref().map(|_| "[REDACTED]"))
            .field("token_ttl_minutes", &self.token_ttl_minutes)
            .field("hash_memory_kib", &self.hash_memory_kib)
            .field("hash_iterations", &self.hash_iterations)
            .field("hash_parallelism", &self.hash_parallelism)
            .field(
                "bootstrap_admin",
                &self.bootstrap_admin.as_ref().map(|a| &a.username),
            )
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BootstrapAdmin {
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database file for the `sqlite` backend.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: PathBuf::from("principals.db"),
        }
    }
}

/// Where the signing key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningKeySource {
    Configured,
    DevelopmentDefault,
}

impl Config {
    /// Load from `path`, or from the default location if it exists, then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// `<platform config dir>/authkeeper/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "authkeeper")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Apply overrides from a variable lookup (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        if let Some(key) = lookup(ENV_SIGNING_KEY) {
            self.auth.signing_key = Some(key);
        }
        if let Some(environment) = lookup(ENV_ENVIRONMENT) {
            self.environment = environment;
        }
        if let Some(host) = lookup(ENV_HOST) {
            self.gateway.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.gateway.port = port
                .parse()
                .with_context(|| format!("{ENV_PORT} is not a valid port: {port}"))?;
        }
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.storage.backend = StorageBackend::Sqlite;
            self.storage.path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.auth.token_ttl_minutes.saturating_mul(60))
    }

    /// Resolve the token signing key.
    ///
    /// Falls back to [`DEV_SIGNING_KEY`] outside production; in production a
    /// missing key is an error.
    pub fn signing_key(&self) -> Result<(Vec<u8>, SigningKeySource)> {
        let configured = self
            .auth
            .signing_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty());

        match configured {
            Some(key) if key == DEV_SIGNING_KEY && self.is_production() => {
                bail!("the development signing key must not be used in production")
            }
            Some(key) => {
                if key.len() < MIN_SIGNING_KEY_BYTES {
                    tracing::warn!(
                        "Signing key is shorter than {MIN_SIGNING_KEY_BYTES} bytes; use a longer random key"
                    );
                }
                Ok((key.as_bytes().to_vec(), SigningKeySource::Configured))
            }
            None if self.is_production() => bail!(
                "no token signing key configured; set {ENV_SIGNING_KEY} or [auth] signing_key"
            ),
            None => {
                tracing::warn!(
                    "No signing key configured; using the insecure development key. Set {ENV_SIGNING_KEY} before deploying."
                );
                Ok((
                    DEV_SIGNING_KEY.as_bytes().to_vec(),
                    SigningKeySource::DevelopmentDefault,
                ))
            }
        }
    }

    /// Check settings that would otherwise fail late.
    pub fn validate(&self) -> Result<()> {
        if self.auth.token_ttl_minutes == 0 {
            bail!("[auth] token_ttl_minutes must be greater than zero");
        }
        if let Some(admin) = &self.auth.bootstrap_admin {
            if admin.username.trim().is_empty() || admin.password.is_empty() {
                bail!("[auth.bootstrap_admin] needs a username and a password");
            }
        }
        self.signing_key()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_reference_service() {
        let config = Config::default();
        assert_eq!(config.gateway.port, 3001);
        assert_eq!(config.auth.token_ttl_minutes, 30);
        assert_eq!(config.token_ttl(), Duration::from_secs(1800));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(!config.is_production());
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            environment = "production"

            [gateway]
            port = 8080

            [auth]
            signing_key = "0123456789abcdef0123456789abcdef"
            token_ttl_minutes = 5

            [auth.bootstrap_admin]
            email = "admin@example.com"
            username = "admin"
            password = "admin123"

            [storage]
            backend = "sqlite"
            path = "/tmp/principals.db"
            "#,
        )
        .unwrap();

        assert!(config.is_production());
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.token_ttl(), Duration::from_secs(300));
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        let admin = config.auth.bootstrap_admin.as_ref().unwrap();
        assert_eq!(admin.username, "admin");
        assert!(admin.full_name.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[
                (ENV_SIGNING_KEY, "from-env-key"),
                (ENV_ENVIRONMENT, "production"),
                (ENV_PORT, "9000"),
                (ENV_DB_PATH, "/data/p.db"),
            ]))
            .unwrap();

        assert_eq!(config.auth.signing_key.as_deref(), Some("from-env-key"));
        assert!(config.is_production());
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.path, PathBuf::from("/data/p.db"));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[(ENV_SIGNING_KEY, "   ")]))
            .unwrap();
        assert!(config.auth.signing_key.is_none());
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(env(&[(ENV_PORT, "not-a-port")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_PORT));
    }

    #[test]
    fn development_falls_back_to_dev_key() {
        let (key, source) = Config::default().signing_key().unwrap();
        assert_eq!(key, DEV_SIGNING_KEY.as_bytes());
        assert_eq!(source, SigningKeySource::DevelopmentDefault);
    }

    #[test]
    fn production_requires_a_key() {
        let config = Config {
            environment: "production".into(),
            ..Config::default()
        };
        assert!(config.signing_key().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn production_rejects_dev_key() {
        let mut config = Config {
            environment: "Production".into(),
            ..Config::default()
        };
        config.auth.signing_key = Some(DEV_SIGNING_KEY.into());
        assert!(config.signing_key().is_err());
    }

    #[test]
    fn configured_key_is_used() {
        let mut config = Config::default();
        config.auth.signing_key = Some("  a-real-key  ".into());
        let (key, source) = config.signing_key().unwrap();
        assert_eq!(key, b"a-real-key");
        assert_eq!(source, SigningKeySource::Configured);
    }

    #[test]
    fn zero_ttl_fails_validation() {
        let mut config = Config::default();
        config.auth.token_ttl_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = Config::default();
        config.auth.signing_key = Some("super-secret-signing-key".into());
        config.auth.bootstrap_admin = Some(BootstrapAdmin {
            email: "admin@example.com".into(),
            username: "admin".into(),
            full_name: String::new(),
            password: "admin123".into(),
        });
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret-signing-key"));
        assert!(!rendered.contains("admin123"));
    }

    #[test]
    fn serialized_config_omits_secrets() {
        let mut config = Config::default();
        config.auth.signing_key = Some("super-secret-signing-key".into());
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("super-secret-signing-key"));
    }

    #[test]
    fn load_reads_explicit_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[gateway]\nport = 4100\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.gateway.port, 4100);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/authkeeper.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
