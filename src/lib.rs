#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod gateway;

use anyhow::{Context, Result};
use auth::{
    AuthService, CredentialHasher, MemoryRegistry, Registration, Registry, SqliteRegistry,
    TokenCodec,
};
use config::{Config, StorageBackend};
use std::sync::Arc;

/// Build the identity service described by `config`: registry, hasher,
/// token codec, and the optional bootstrap admin.
pub fn build_auth_service(config: &Config) -> Result<AuthService> {
    config.validate()?;

    let registry: Arc<dyn Registry> = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory principal registry");
            Arc::new(MemoryRegistry::new())
        }
        StorageBackend::Sqlite => {
            let store = SqliteRegistry::open(&config.storage.path)?;
            tracing::info!(
                "Principal registry opened at {}",
                config.storage.path.display()
            );
            Arc::new(store)
        }
    };

    let hasher = match (
        config.auth.hash_memory_kib,
        config.auth.hash_iterations,
        config.auth.hash_parallelism,
    ) {
        (None, None, None) => CredentialHasher::new(),
        (memory, iterations, parallelism) => {
            let defaults = argon2::Params::default();
            CredentialHasher::with_params(
                memory.unwrap_or(defaults.m_cost()),
                iterations.unwrap_or(defaults.t_cost()),
                parallelism.unwrap_or(defaults.p_cost()),
            )
            .context("invalid [auth] hashing parameters")?
        }
    };

    let (key, _source) = config.signing_key()?;
    let tokens = TokenCodec::new(&key, config.token_ttl());
    let service = AuthService::new(registry, hasher, tokens);

    if let Some(admin) = &config.auth.bootstrap_admin {
        let created = service
            .seed(Registration {
                email: admin.email.clone(),
                username: admin.username.clone(),
                password: admin.password.clone(),
                full_name: admin.full_name.clone(),
            })
            .context("failed to create bootstrap admin")?;
        if created {
            tracing::info!(username = %admin.username, "Bootstrap admin created");
        }
    }

    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootstrapAdmin;

    fn cheap_config() -> Config {
        let mut config = Config::default();
        config.auth.hash_memory_kib = Some(8);
        config.auth.hash_iterations = Some(1);
        config.auth.hash_parallelism = Some(1);
        config
    }

    #[test]
    fn builds_with_defaults() {
        let service = build_auth_service(&cheap_config()).unwrap();
        assert!(matches!(
            service.resolve("nothing"),
            Err(auth::AuthError::Unauthorized)
        ));
    }

    #[test]
    fn bootstrap_admin_can_log_in() {
        let mut config = cheap_config();
        config.auth.bootstrap_admin = Some(BootstrapAdmin {
            email: "admin@example.com".into(),
            username: "admin".into(),
            full_name: "System Administrator".into(),
            password: "admin123".into(),
        });

        let service = build_auth_service(&config).unwrap();
        let token = service.login("admin", "admin123").unwrap();
        let me = service.resolve(&token.access_token).unwrap();
        assert_eq!(me.id, 1);
        assert_eq!(me.full_name, "System Administrator");
    }

    #[test]
    fn sqlite_backend_persists_bootstrap_admin_once() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = cheap_config();
        config.storage.backend = StorageBackend::Sqlite;
        config.storage.path = tmp.path().join("principals.db");
        config.auth.bootstrap_admin = Some(BootstrapAdmin {
            email: "admin@example.com".into(),
            username: "admin".into(),
            full_name: String::new(),
            password: "admin123".into(),
        });

        build_auth_service(&config).unwrap();
        let service = build_auth_service(&config).unwrap();
        let token = service.login("admin", "admin123").unwrap();
        assert_eq!(service.list_all(&token.access_token).unwrap().len(), 1);
    }

    #[test]
    fn production_without_key_fails() {
        let mut config = cheap_config();
        config.environment = "production".into();
        assert!(build_auth_service(&config).is_err());
    }

    #[test]
    fn bad_hash_params_fail() {
        let mut config = cheap_config();
        config.auth.hash_iterations = Some(0);
        assert!(build_auth_service(&config).is_err());
    }
}
