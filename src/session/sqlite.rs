//! SQLite session store.
//!
//! Each session is one row holding the JSON document plus the columns
//! needed to look it up and order it.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use super::store::{not_found, validate_key, SessionStore};
use super::types::{BuildSession, SessionUpdate};
use crate::error::StoreError;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS build_sessions (
    user_id    TEXT NOT NULL,
    session_id TEXT NOT NULL,
    status     TEXT NOT NULL,
    document   TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, session_id)
)
"#;

/// Session store backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Connects to `database_url` (e.g. `sqlite://sessions.db`), creating the
    /// database file and table when missing.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // every connection to an in-memory URL sees its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, creating the table when missing.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode(document: &str) -> Result<BuildSession, StoreError> {
    serde_json::from_str(document)
        .map_err(|e| StoreError::InvalidData(format!("stored session document: {}", e)))
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339()
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, session: &BuildSession) -> Result<(), StoreError> {
        validate_key(&session.user_id, &session.session_id)?;
        let document = serde_json::to_string(session)?;

        let result = sqlx::query(
            r#"
            INSERT INTO build_sessions (user_id, session_id, status, document, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (user_id, session_id) DO NOTHING
            "#,
        )
        .bind(&session.user_id)
        .bind(&session.session_id)
        .bind(session.status.as_str())
        .bind(&document)
        .bind(timestamp(&session.created_at))
        .bind(timestamp(&session.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                user_id: session.user_id.clone(),
                session_id: session.session_id.clone(),
            });
        }
        Ok(())
    }

    async fn get(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<BuildSession>, StoreError> {
        let row = sqlx::query(
            "SELECT document FROM build_sessions WHERE user_id = ?1 AND session_id = ?2",
        )
        .bind(user_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let document: String = row.try_get("document")?;
                Ok(Some(decode(&document)?))
            }
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        user_id: &str,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<BuildSession, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT document FROM build_sessions WHERE user_id = ?1 AND session_id = ?2",
        )
        .bind(user_id)
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found(user_id, session_id))?;

        let document: String = row.try_get("document")?;
        let mut session = decode(&document)?;
        update.apply(&mut session);

        sqlx::query(
            r#"
            UPDATE build_sessions
            SET status = ?3, document = ?4, updated_at = ?5
            WHERE user_id = ?1 AND session_id = ?2
            "#,
        )
        .bind(user_id)
        .bind(session_id)
        .bind(session.status.as_str())
        .bind(serde_json::to_string(&session)?)
        .bind(timestamp(&session.updated_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(session)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<BuildSession>, StoreError> {
        let rows = sqlx::query(
            "SELECT document FROM build_sessions WHERE user_id = ?1 ORDER BY created_at, session_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let document: String = row.try_get("document")?;
                decode(&document)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::TrainingStats;
    use crate::session::types::{CurrentStep, SessionStatus, Stage};

    async fn store() -> SqliteSessionStore {
        SqliteSessionStore::connect("sqlite::memory:")
            .await
            .expect("in-memory database")
    }

    #[tokio::test]
    async fn test_sqlite_create_get_update() {
        let store = store().await;
        let session = BuildSession::new("alice", "s1", "segment tumours");
        store.create(&session).await.expect("create");
        assert!(matches!(
            store.create(&session).await,
            Err(StoreError::AlreadyExists { .. })
        ));

        let updated = store
            .update(
                "alice",
                "s1",
                &SessionUpdate::new()
                    .status(SessionStatus::Running)
                    .current_step(CurrentStep::Stage(Stage::Training))
                    .training_stats(TrainingStats::new(20)),
            )
            .await
            .expect("update");
        assert_eq!(updated.current_step, CurrentStep::Stage(Stage::Training));

        let loaded = store.get("alice", "s1").await.expect("get").expect("exists");
        assert_eq!(loaded, updated);
        assert_eq!(loaded.training_stats.map(|s| s.total_epochs), Some(20));
    }

    #[tokio::test]
    async fn test_sqlite_missing_session() {
        let store = store().await;
        assert!(store.get("alice", "nope").await.expect("get").is_none());
        assert!(matches!(
            store.update("alice", "nope", &SessionUpdate::new()).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_sqlite_list_for_user() {
        let store = store().await;
        store.create(&BuildSession::new("alice", "s1", "x")).await.expect("create");
        store.create(&BuildSession::new("bob", "s2", "y")).await.expect("create");

        let sessions = store.list_for_user("alice").await.expect("list");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "s1");
    }
}
