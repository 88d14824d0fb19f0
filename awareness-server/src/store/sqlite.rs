//! SQLite implementation of `WarningStore`.
//!
//! Counts survive restarts. The database carries a `schema_version` table;
//! when the schema changes, bump `CURRENT_SCHEMA_VERSION` and add a step to
//! `run_migrations()`. Steps run in order from the stored version.
//!
//! Blocking rusqlite calls run on `spawn_blocking`. A write that has started
//! completes even if the awaiting task is dropped, so a cancelled event never
//! leaves a half-written record.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use super::{StoreError, WarningRecord, WarningStore};
use crate::moderation::UserId;

/// Current schema version.
pub(crate) const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed warning store.
pub struct SqliteWarningStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWarningStore {
    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// The connection uses `journal_mode = WAL`, `synchronous = FULL` and a
    /// 5 s busy timeout.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| StoreError::storage("open database", e.to_string()))?;

        #[cfg(unix)]
        if !is_in_memory {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // In-memory databases report "memory"; anything else must be WAL.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::storage("set journal_mode", e.to_string()))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(StoreError::storage(
                "configure journal_mode",
                format!(
                    "SQLite returned '{}' instead of 'wal'; the filesystem may not support shared memory",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::storage("configure database", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a new in-memory database (for testing).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:")
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(
                "schema version",
                format!(
                    "database schema version {} is newer than supported version {}",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS warnings (
                    user_id TEXT PRIMARY KEY,
                    warning_count INTEGER NOT NULL
                );
                "#,
            )
            .map_err(|e| StoreError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::storage("update schema version", e.to_string()))?;

        info!(
            "Migrated warning database from schema v{} to v{}",
            from_version, CURRENT_SCHEMA_VERSION
        );

        Ok(())
    }

    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard: MutexGuard<'_, Connection> = conn
                .lock()
                .map_err(|_| StoreError::storage(operation, "connection mutex poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::storage(operation, e.to_string()))?
    }
}

/// SQLite integers are signed; counts are not.
fn count_to_i64(user_id: &str, count: u64) -> Result<i64, StoreError> {
    i64::try_from(count).map_err(|_| {
        StoreError::corrupt(
            user_id,
            format!("count {} exceeds maximum storable value ({})", count, i64::MAX),
        )
    })
}

fn i64_to_count(user_id: &str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::corrupt(user_id, format!("negative count {} in database", value)))
}

#[async_trait]
impl WarningStore for SqliteWarningStore {
    async fn get(&self, user_id: &UserId) -> Result<u64, StoreError> {
        let key = user_id.normalized();
        self.with_conn("get", move |conn| {
            let stored: Option<i64> = conn
                .query_row(
                    "SELECT warning_count FROM warnings WHERE user_id = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::storage("get", e.to_string()))?;

            match stored {
                Some(value) => i64_to_count(&key, value),
                None => Ok(0),
            }
        })
        .await
    }

    async fn set(&self, user_id: &UserId, count: u64) -> Result<(), StoreError> {
        let key = user_id.normalized();
        let value = count_to_i64(&key, count)?;
        self.with_conn("set", move |conn| {
            conn.execute(
                "INSERT INTO warnings (user_id, warning_count) VALUES (?1, ?2)
                 ON CONFLICT (user_id) DO UPDATE SET warning_count = excluded.warning_count",
                params![key, value],
            )
            .map_err(|e| StoreError::storage("set", e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn all(&self) -> Result<Vec<WarningRecord>, StoreError> {
        self.with_conn("all", |conn| {
            let mut stmt = conn
                .prepare("SELECT user_id, warning_count FROM warnings ORDER BY user_id")
                .map_err(|e| StoreError::storage("all", e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| StoreError::storage("all", e.to_string()))?;

            let mut records = Vec::new();
            for row in rows {
                let (user_id, value) = row.map_err(|e| StoreError::storage("all row", e.to_string()))?;
                let warning_count = i64_to_count(&user_id, value)?;
                records.push(WarningRecord {
                    user_id,
                    warning_count,
                });
            }
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_zero_for_missing() {
        let store = SqliteWarningStore::new_in_memory().unwrap();
        assert_eq!(store.get(&UserId::from("@bob:x")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = SqliteWarningStore::new_in_memory().unwrap();
        let bob = UserId::from("@bob:x");
        store.set(&bob, 1).await.unwrap();
        store.set(&bob, 2).await.unwrap();
        assert_eq!(store.get(&bob).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_case_insensitive_single_row() {
        let store = SqliteWarningStore::new_in_memory().unwrap();
        store.set(&UserId::from("@Alice:Example.org"), 4).await.unwrap();
        assert_eq!(
            store.get(&UserId::from("@alice:example.org")).await.unwrap(),
            4
        );

        store.set(&UserId::from("@ALICE:EXAMPLE.ORG"), 5).await.unwrap();
        let all = store.all().await.unwrap();
        assert_eq!(
            all,
            vec![WarningRecord {
                user_id: "@alice:example.org".to_string(),
                warning_count: 5,
            }]
        );
    }

    #[tokio::test]
    async fn test_all_is_ordered() {
        let store = SqliteWarningStore::new_in_memory().unwrap();
        store.set(&UserId::from("@zed:x"), 1).await.unwrap();
        store.set(&UserId::from("@amy:x"), 2).await.unwrap();
        let ids: Vec<String> = store
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(ids, vec!["@amy:x", "@zed:x"]);
    }

    #[tokio::test]
    async fn test_counts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("awareness.db");

        {
            let store = SqliteWarningStore::new(&path).unwrap();
            store.set(&UserId::from("@bob:x"), 7).await.unwrap();
        }

        let reopened = SqliteWarningStore::new(&path).unwrap();
        assert_eq!(reopened.get(&UserId::from("@bob:x")).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_schema_version_recorded() {
        let store = SqliteWarningStore::new_in_memory().unwrap();
        let version = store
            .with_conn("test", |conn| {
                conn.query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(|e| StoreError::storage("test", e.to_string()))
            })
            .await
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("awareness.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE schema_version (id INTEGER PRIMARY KEY CHECK (id = 1), version INTEGER NOT NULL);
                 INSERT INTO schema_version (id, version) VALUES (1, 99);",
            )
            .unwrap();
        }

        match SqliteWarningStore::new(&path) {
            Err(StoreError::Storage { operation, .. }) => assert_eq!(operation, "schema version"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("newer schema should be rejected"),
        }
    }

    #[tokio::test]
    async fn test_negative_count_is_corruption_not_zero() {
        let store = SqliteWarningStore::new_in_memory().unwrap();
        store
            .with_conn("test", |conn| {
                conn.execute(
                    "INSERT INTO warnings (user_id, warning_count) VALUES ('@bob:x', -4)",
                    [],
                )
                .map_err(|e| StoreError::storage("test", e.to_string()))?;
                Ok(())
            })
            .await
            .unwrap();

        let err = store.get(&UserId::from("@bob:x")).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_count_beyond_i64_is_rejected() {
        let store = SqliteWarningStore::new_in_memory().unwrap();
        let err = store
            .set(&UserId::from("@bob:x"), u64::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
