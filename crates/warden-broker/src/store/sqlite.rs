//! SQLite record backend.

use super::{RecordBackend, RefreshTokenRecord};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::fs;
use std::path::Path;
use std::time::Duration;
use warden_core::{PrincipalId, ScopeSet};

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    principal_id: String,
    sealed_secret: Vec<u8>,
    granted_scopes: String,
    generation: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for RefreshTokenRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let granted_scopes: ScopeSet = serde_json::from_str(&row.granted_scopes)?;
        let generation = u64::try_from(row.generation).map_err(|_| {
            StoreError::Corrupt(format!(
                "negative generation {} for {}",
                row.generation, row.principal_id
            ))
        })?;
        Ok(Self {
            principal: PrincipalId::new(row.principal_id),
            sealed_secret: row.sealed_secret,
            granted_scopes,
            generation,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Records in a SQLite database, one row per principal.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Use an existing pool. Migrations are applied.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RecordBackend for SqliteBackend {
    async fn upsert(
        &self,
        principal: &PrincipalId,
        sealed_secret: Vec<u8>,
        granted_scopes: &ScopeSet,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let scopes = serde_json::to_string(granted_scopes)?;
        let generation: i64 = sqlx::query_scalar(
            "INSERT INTO refresh_tokens \
                (principal_id, sealed_secret, granted_scopes, generation, created_at, updated_at) \
             VALUES (?, ?, ?, 1, ?, ?) \
             ON CONFLICT(principal_id) DO UPDATE SET \
                sealed_secret = excluded.sealed_secret, \
                granted_scopes = excluded.granted_scopes, \
                generation = refresh_tokens.generation + 1, \
                updated_at = excluded.updated_at \
             RETURNING generation",
        )
        .bind(principal.as_str())
        .bind(sealed_secret)
        .bind(scopes)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(generation as u64)
    }

    async fn get(&self, principal: &PrincipalId) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(
            "SELECT principal_id, sealed_secret, granted_scopes, generation, created_at, updated_at \
             FROM refresh_tokens WHERE principal_id = ?",
        )
        .bind(principal.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(RefreshTokenRecord::try_from).transpose()
    }

    async fn compare_and_swap(
        &self,
        principal: &PrincipalId,
        expected_generation: u64,
        sealed_secret: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE refresh_tokens \
             SET sealed_secret = ?, generation = generation + 1, updated_at = ? \
             WHERE principal_id = ? AND generation = ?",
        )
        .bind(sealed_secret)
        .bind(now)
        .bind(principal.as_str())
        .bind(expected_generation as i64)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT generation FROM refresh_tokens WHERE principal_id = ?")
                    .bind(principal.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(StoreError::Conflict {
                principal: principal.clone(),
                expected: expected_generation,
                actual: actual.map(|g| g as u64),
            });
        }

        tx.commit().await?;
        Ok(expected_generation + 1)
    }

    async fn remove(&self, principal: &PrincipalId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE principal_id = ?")
            .bind(principal.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
