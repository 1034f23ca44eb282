//! SQLite storage backend for the key directory.

use super::{KeyStore, StoredBundle, UploadOutcome};
use crate::error::StorageError;
use async_trait::async_trait;
use courier_types::{UserId, ValidatedUpload};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// SQLite-based key storage.
///
/// Uses WAL mode for concurrent reads/writes. Every transaction that reads
/// and then mutates opens with its write, so SQLite's writer lock is taken
/// before anything is read and concurrent transactions serialise instead of
/// racing on a stale snapshot.
#[derive(Clone)]
pub struct SqliteKeyStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteKeyStore")
            .field("connections", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl SqliteKeyStore {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let path_str = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(path_str)
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .foreign_keys(true);

        // A single connection that never recycles: closing it would drop the database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                identity_key TEXT NOT NULL,
                signed_pre_key TEXT NOT NULL,
                signed_pre_key_sig TEXT NOT NULL,
                last_seen INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS one_time_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL REFERENCES users(user_id),
                key_data TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_one_time_keys_user ON one_time_keys(user_id, id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Migration(e.to_string()))?;
        }
        Ok(())
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl KeyStore for SqliteKeyStore {
    async fn store_upload(
        &self,
        upload: &ValidatedUpload,
    ) -> Result<UploadOutcome, StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        // TOFU check and upsert in one statement: an existing row is only
        // updated when its identity_key matches, so zero affected rows means
        // the user_id is pinned to a different key.
        let upserted = sqlx::query(
            r#"
            INSERT INTO users
                (user_id, identity_key, signed_pre_key, signed_pre_key_sig, last_seen)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id) DO UPDATE SET
                signed_pre_key = excluded.signed_pre_key,
                signed_pre_key_sig = excluded.signed_pre_key_sig,
                last_seen = excluded.last_seen
            WHERE users.identity_key = excluded.identity_key
            "#,
        )
        .bind(upload.user_id.as_str())
        .bind(upload.identity_key.to_hex())
        .bind(upload.signed_pre_key.to_hex())
        .bind(upload.signature.to_hex())
        .bind(Self::current_timestamp())
        .execute(&mut *tx)
        .await
        .map_err(StorageError::Database)?
        .rows_affected();

        if upserted == 0 {
            tx.rollback().await.map_err(StorageError::Database)?;
            return Ok(UploadOutcome::IdentityConflict);
        }

        for key in &upload.one_time_keys {
            sqlx::query("INSERT INTO one_time_keys (user_id, key_data) VALUES (?1, ?2)")
                .bind(upload.user_id.as_str())
                .bind(key.to_hex())
                .execute(&mut *tx)
                .await
                .map_err(StorageError::Database)?;
        }

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(UploadOutcome::Stored {
            one_time_keys_added: upload.one_time_keys.len(),
        })
    }

    async fn take_bundle(
        &self,
        user_id: &UserId,
    ) -> Result<Option<StoredBundle>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        // Consume first so the writer lock is held before the bundle is read.
        let one_time_pre_key: Option<String> = sqlx::query_scalar(
            r#"
            DELETE FROM one_time_keys
            WHERE id = (
                SELECT id FROM one_time_keys
                WHERE user_id = ?1
                ORDER BY id ASC
                LIMIT 1
            )
            RETURNING key_data
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT identity_key, signed_pre_key, signed_pre_key_sig
            FROM users
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(StorageError::Database)?;
            return Ok(None);
        };

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(Some(StoredBundle {
            identity_key: row.identity_key,
            signed_pre_key: row.signed_pre_key,
            signed_pre_key_sig: row.signed_pre_key_sig,
            one_time_pre_key,
        }))
    }

    async fn one_time_key_count(
        &self,
        user_id: &UserId,
    ) -> Result<Option<u64>, StorageError> {
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT (SELECT COUNT(*) FROM one_time_keys WHERE user_id = ?1)
            FROM users
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(count.map(|c| c as u64))
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct UserRow {
    identity_key: String,
    signed_pre_key: String,
    signed_pre_key_sig: String,
}
