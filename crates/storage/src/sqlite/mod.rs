use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    CreateSqliteDirectorySnafu, DecodeTurnsSnafu, EncodeTurnsSnafu, InvariantViolationSnafu,
    SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu,
    SqliteQuerySnafu, StorageResult,
};
use super::ids::{ClientId, SessionId};
use super::types::{SessionDocument, StoredTurn};
use super::ConversationStore;

/// Sqlite-backed conversation document store: one row per session.
#[derive(Debug, Clone)]
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        // Explicit PRAGMA writes make bootstrap behavior deterministic.
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn fetch(&self, session_id: &SessionId) -> StorageResult<Option<SessionDocument>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT session_id, owner_id, messages, message_count, created_at, last_updated FROM conversations WHERE session_id = ?",
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "conversation-fetch-query",
        })?;

        row.map(row_to_document).transpose()
    }

    async fn upsert(
        &self,
        session_id: &SessionId,
        owner_id: &ClientId,
        turns: &[StoredTurn],
    ) -> StorageResult<SessionDocument> {
        let turns_json = serde_json::to_string(turns).context(EncodeTurnsSnafu {
            stage: "conversation-upsert-encode",
            session_id: session_id.to_string(),
        })?;
        let message_count = turns.len() as i64;
        let now = unix_timestamp_seconds();

        // Merge-upsert: conflicting rows keep their created_at, so repeated
        // persists never destroy fields the save payload does not carry.
        sqlx::query(
            "INSERT INTO conversations (session_id, owner_id, messages, message_count, created_at, last_updated) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(session_id) DO UPDATE SET \
                 owner_id = excluded.owner_id, \
                 messages = excluded.messages, \
                 message_count = excluded.message_count, \
                 last_updated = excluded.last_updated",
        )
        .bind(session_id.as_str())
        .bind(owner_id.as_str())
        .bind(turns_json)
        .bind(message_count)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "conversation-upsert-apply",
        })?;

        let document = self.fetch(session_id).await?;
        document.map_or_else(
            || {
                InvariantViolationSnafu {
                    stage: "conversation-upsert-readback",
                    details: format!("session '{session_id}' missing immediately after upsert"),
                }
                .fail()
            },
            Ok,
        )
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE session_id = ?")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "conversation-delete-apply",
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_owner(
        &self,
        owner_id: &ClientId,
        limit: u32,
    ) -> StorageResult<Vec<SessionDocument>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            "SELECT session_id, owner_id, messages, message_count, created_at, last_updated \
             FROM conversations WHERE owner_id = ? \
             ORDER BY last_updated DESC, session_id DESC LIMIT ?",
        )
        .bind(owner_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "conversation-list-query",
        })?;

        rows.into_iter().map(row_to_document).collect()
    }
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    session_id: String,
    owner_id: String,
    messages: String,
    message_count: i64,
    created_at: i64,
    last_updated: i64,
}

fn row_to_document(row: ConversationRow) -> StorageResult<SessionDocument> {
    let turns: Vec<StoredTurn> = serde_json::from_str(&row.messages).context(DecodeTurnsSnafu {
        stage: "conversation-row-decode-messages",
        session_id: row.session_id.clone(),
    })?;

    Ok(SessionDocument {
        session_id: SessionId::parse(&row.session_id)?,
        owner_id: ClientId::parse(&row.owner_id)?,
        turns,
        message_count: i64_to_u64(row.message_count, "conversation-row-message-count")?,
        created_at_unix_seconds: i64_to_u64(row.created_at, "conversation-row-created-at")?,
        last_updated_unix_seconds: i64_to_u64(row.last_updated, "conversation-row-last-updated")?,
    })
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_secs() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| super::error::StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use super::super::types::StoredRole;
    use super::*;

    async fn open_scratch_store(directory: &tempfile::TempDir) -> SqliteConversationStore {
        let db_path = directory.path().join("conversations.db");
        SqliteConversationStore::open(&db_path.display().to_string())
            .await
            .expect("scratch sqlite store should open")
    }

    fn sample_turns() -> Vec<StoredTurn> {
        vec![
            StoredTurn::new(StoredRole::Assistant, "你好，我是一面镜子。"),
            StoredTurn::new(StoredRole::User, "我很焦虑"),
        ]
    }

    async fn force_last_updated(store: &SqliteConversationStore, session_id: &SessionId, value: i64) {
        sqlx::query("UPDATE conversations SET last_updated = ? WHERE session_id = ?")
            .bind(value)
            .bind(session_id.as_str())
            .execute(store.pool())
            .await
            .expect("manual timestamp update should succeed");
    }

    #[tokio::test]
    async fn upsert_then_fetch_roundtrips_the_document() {
        let directory = tempfile::tempdir().unwrap();
        let store = open_scratch_store(&directory).await;

        let owner = ClientId::mint();
        let session = SessionId::mint(&owner);
        let turns = sample_turns();

        let written = store.upsert(&session, &owner, &turns).await.unwrap();
        assert_eq!(written.owner_id, owner);
        assert_eq!(written.message_count, 2);

        let fetched = store.fetch(&session).await.unwrap().unwrap();
        assert_eq!(fetched.turns, turns);
        assert_eq!(fetched.session_id, session);
        assert_eq!(fetched.created_at_unix_seconds, written.created_at_unix_seconds);
    }

    #[tokio::test]
    async fn fetch_missing_session_returns_none() {
        let directory = tempfile::tempdir().unwrap();
        let store = open_scratch_store(&directory).await;

        let owner = ClientId::mint();
        let absent = SessionId::mint(&owner);

        assert!(store.fetch(&absent).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_upserts_merge_and_preserve_created_at() {
        let directory = tempfile::tempdir().unwrap();
        let store = open_scratch_store(&directory).await;

        let owner = ClientId::mint();
        let session = SessionId::mint(&owner);

        let first = store.upsert(&session, &owner, &sample_turns()).await.unwrap();

        let mut grown = sample_turns();
        grown.push(StoredTurn::new(StoredRole::Assistant, "听起来这件事压在你心里有一段时间了。"));
        let second = store.upsert(&session, &owner, &grown).await.unwrap();

        assert_eq!(second.created_at_unix_seconds, first.created_at_unix_seconds);
        assert_eq!(second.message_count, 3);
        assert_eq!(second.turns, grown);
        assert!(second.last_updated_unix_seconds >= first.last_updated_unix_seconds);
    }

    #[tokio::test]
    async fn list_by_owner_filters_by_equality_and_orders_by_recency() {
        let directory = tempfile::tempdir().unwrap();
        let store = open_scratch_store(&directory).await;

        let owner = ClientId::mint();
        let stranger = ClientId::mint();

        let older = SessionId::mint(&owner);
        let newer = SessionId::mint(&owner);
        let foreign = SessionId::mint(&stranger);

        store.upsert(&older, &owner, &sample_turns()).await.unwrap();
        store.upsert(&newer, &owner, &sample_turns()).await.unwrap();
        store.upsert(&foreign, &stranger, &sample_turns()).await.unwrap();

        force_last_updated(&store, &older, 1_000).await;
        force_last_updated(&store, &newer, 2_000).await;

        let listed = store.list_by_owner(&owner, 10).await.unwrap();
        let ids: Vec<&SessionId> = listed.iter().map(|doc| &doc.session_id).collect();

        assert_eq!(ids, vec![&newer, &older]);
        assert!(listed.iter().all(|doc| doc.owner_id == owner));

        let bounded = store.list_by_owner(&owner, 1).await.unwrap();
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[0].session_id, newer);
    }

    #[tokio::test]
    async fn delete_removes_only_the_target_session() {
        let directory = tempfile::tempdir().unwrap();
        let store = open_scratch_store(&directory).await;

        let owner = ClientId::mint();
        let doomed = SessionId::mint(&owner);
        let survivor = SessionId::mint(&owner);

        store.upsert(&doomed, &owner, &sample_turns()).await.unwrap();
        store.upsert(&survivor, &owner, &sample_turns()).await.unwrap();

        assert!(store.delete(&doomed).await.unwrap());
        assert!(!store.delete(&doomed).await.unwrap());

        assert!(store.fetch(&doomed).await.unwrap().is_none());
        let remaining = store.fetch(&survivor).await.unwrap().unwrap();
        assert_eq!(remaining.message_count, 2);
    }
}
