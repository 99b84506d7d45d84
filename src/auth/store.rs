//! SQLite-backed principal registry.
//!
//! Table:
//! - `principals`: id, email, username, full_name, verifier, created_at, active
//!
//! `email` and `username` carry `UNIQUE` constraints with the default BINARY
//! collation, matching the exact-string semantics of [`MemoryRegistry`].
//!
//! [`MemoryRegistry`]: super::registry::MemoryRegistry

use super::hasher::CredentialVerifier;
use super::registry::{NewPrincipal, Principal, Registry, RegistryError};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const PRINCIPAL_COLUMNS: &str = "id, email, username, full_name, verifier, created_at, active";

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(Box::new(err))
    }
}

/// SQLite-backed registry.
pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    /// Open (or create) the registry database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create registry directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open registry at {}", db_path.display()))?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Self::init(conn)
    }

    /// Registry backed by a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // AUTOINCREMENT keeps ids from being reused even if rows are ever removed.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS principals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL UNIQUE,
                full_name TEXT NOT NULL,
                verifier TEXT NOT NULL,
                created_at TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );",
        )
        .context("failed to create principals table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Registry for SqliteRegistry {
    fn insert(&self, candidate: NewPrincipal) -> Result<Principal, RegistryError> {
        let created_at = Utc::now();

        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO principals (email, username, full_name, verifier, created_at, active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            params![
                candidate.email,
                candidate.username,
                candidate.full_name,
                candidate.verifier.as_str(),
                created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(Principal {
                id: conn.last_insert_rowid(),
                email: candidate.email,
                username: candidate.username,
                full_name: candidate.full_name,
                verifier: candidate.verifier,
                created_at,
                active: true,
            }),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(RegistryError::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn find_by_handle(&self, username: &str) -> Result<Option<Principal>, RegistryError> {
        let conn = self.conn.lock();
        let principal = conn
            .query_row(
                &format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE username = ?1"),
                params![username],
                principal_from_row,
            )
            .optional()?;
        Ok(principal)
    }

    fn list(&self) -> Result<Vec<Principal>, RegistryError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {PRINCIPAL_COLUMNS} FROM principals ORDER BY id"))?;
        let principals = stmt
            .query_map([], principal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(principals)
    }

    fn len(&self) -> Result<usize, RegistryError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM principals", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn principal_from_row(row: &Row<'_>) -> rusqlite::Result<Principal> {
    let created_at: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let verifier: String = row.get(4)?;

    Ok(Principal {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        full_name: row.get(3)?,
        verifier: CredentialVerifier::from_stored(verifier),
        created_at,
        active: row.get(6)?,
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::registry::candidate;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteRegistry) {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("principals.db");
        let store = SqliteRegistry::open(&db_path).unwrap();
        (tmp, store)
    }

    #[test]
    fn insert_and_find() {
        let (_tmp, store) = test_store();

        let stored = store.insert(candidate("a@x.com", "alice")).unwrap();
        assert_eq!(stored.id, 1);
        assert!(stored.active);

        let found = store.find_by_handle("alice").unwrap().unwrap();
        assert_eq!(found.id, 1);
        assert_eq!(found.email, "a@x.com");
        assert_eq!(found.verifier, stored.verifier);
        assert_eq!(
            found.created_at.timestamp_micros(),
            stored.created_at.timestamp_micros()
        );
    }

    #[test]
    fn duplicate_email_fails() {
        let (_tmp, store) = test_store();

        store.insert(candidate("a@x.com", "alice")).unwrap();
        let result = store.insert(candidate("a@x.com", "alice2"));
        assert!(matches!(result, Err(RegistryError::Duplicate)));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn duplicate_username_fails() {
        let (_tmp, store) = test_store();

        store.insert(candidate("a@x.com", "alice")).unwrap();
        let result = store.insert(candidate("b@x.com", "alice"));
        assert!(matches!(result, Err(RegistryError::Duplicate)));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn matching_is_case_sensitive() {
        let (_tmp, store) = test_store();

        store.insert(candidate("a@x.com", "alice")).unwrap();
        store.insert(candidate("A@X.COM", "ALICE")).unwrap();
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn find_unknown_returns_none() {
        let (_tmp, store) = test_store();
        assert!(store.find_by_handle("ghost").unwrap().is_none());
    }

    #[test]
    fn list_in_insertion_order() {
        let (_tmp, store) = test_store();

        store.insert(candidate("c@x.com", "carol")).unwrap();
        store.insert(candidate("a@x.com", "alice")).unwrap();

        let principals = store.list().unwrap();
        let names: Vec<_> = principals.iter().map(|p| p.username.as_str()).collect();
        assert_eq!(names, ["carol", "alice"]);
        assert_eq!(principals[1].id, 2);
    }

    #[test]
    fn principals_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("principals.db");

        {
            let store = SqliteRegistry::open(&db_path).unwrap();
            store.insert(candidate("a@x.com", "alice")).unwrap();
        }

        let store = SqliteRegistry::open(&db_path).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        let next = store.insert(candidate("b@x.com", "bob")).unwrap();
        assert_eq!(next.id, 2);
        assert!(matches!(
            store.insert(candidate("a@x.com", "alice")),
            Err(RegistryError::Duplicate)
        ));
    }

    #[test]
    fn in_memory_database_works() {
        let store = SqliteRegistry::open_in_memory().unwrap();
        assert!(store.is_empty().unwrap());
        store.insert(candidate("a@x.com", "alice")).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn backend_failure_is_boxed_storage_error() {
        let store = SqliteRegistry::open_in_memory().unwrap();
        store.conn.lock().execute_batch("DROP TABLE principals").unwrap();

        match store.list() {
            Err(RegistryError::Storage(source)) => {
                assert!(source.downcast_ref::<rusqlite::Error>().is_some());
            }
            other => panic!("expected storage error, got {other:?}"),
        }
    }
}
