//! SQLite implementation of [`DownloadStore`].
//!
//! Migrations are embedded at compile time with `sqlx::migrate!` and run on
//! [`SqliteStore::connect`]. Queries use the runtime-checked `sqlx::query`
//! form so no `DATABASE_URL` is needed to build.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use scyd_core::store::DownloadStore;
use scyd_core::{DownloadId, DownloadRecord, DownloadState};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct DownloadRow {
    id: i64,
    url: String,
    state: String,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<DownloadRow> for DownloadRecord {
    type Error = sqlx::Error;

    fn try_from(row: DownloadRow) -> Result<Self, Self::Error> {
        let state = DownloadState::from_str(&row.state)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(DownloadRecord {
            id: row.id,
            url: row.url,
            state,
            error_message: row.error_message,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

const SELECT_DOWNLOAD: &str =
    "SELECT id, url, state, error_message, created_at, updated_at FROM downloads";

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g. `"sqlite://scyd.db"`
    /// or `"sqlite::memory:"` for tests.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // Each in-memory connection is its own database.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().connect_with(options).await?
        };
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

impl DownloadStore for SqliteStore {
    type Error = sqlx::Error;

    async fn create_download(&self, url: &str) -> Result<DownloadRecord, sqlx::Error> {
        let now = Utc::now();
        let stamp = now.to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO downloads (url, state, error_message, created_at, updated_at) \
             VALUES (?1, ?2, NULL, ?3, ?3)",
        )
        .bind(url)
        .bind(DownloadState::Pending.as_ref())
        .bind(&stamp)
        .execute(&self.pool)
        .await?;

        Ok(DownloadRecord {
            id: result.last_insert_rowid(),
            url: url.to_owned(),
            state: DownloadState::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_download_state(
        &self,
        id: DownloadId,
        state: DownloadState,
        error_message: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let allowed = state.predecessors();
        if allowed.is_empty() {
            return Ok(false);
        }
        let placeholders = vec!["?"; allowed.len()].join(", ");
        let sql = format!(
            "UPDATE downloads SET state = ?, error_message = ?, updated_at = ? \
             WHERE id = ? AND state IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql)
            .bind(state.as_ref())
            .bind(error_message)
            .bind(Utc::now().to_rfc3339())
            .bind(id);
        for from in allowed {
            query = query.bind(from.as_ref());
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_download(&self, id: DownloadId) -> Result<Option<DownloadRecord>, sqlx::Error> {
        let row: Option<DownloadRow> = sqlx::query_as(&format!("{SELECT_DOWNLOAD} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(DownloadRecord::try_from).transpose()
    }

    async fn list_downloads(&self) -> Result<Vec<DownloadRecord>, sqlx::Error> {
        let rows: Vec<DownloadRow> =
            sqlx::query_as(&format!("{SELECT_DOWNLOAD} ORDER BY created_at DESC, id DESC"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(DownloadRecord::try_from).collect()
    }

    async fn delete_download(&self, id: DownloadId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM downloads WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn interrupt_unfinished(&self, message: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE downloads SET state = ?1, error_message = ?2, updated_at = ?3 \
             WHERE state IN (?4, ?5)",
        )
        .bind(DownloadState::Error.as_ref())
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .bind(DownloadState::Pending.as_ref())
        .bind(DownloadState::Progress.as_ref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_then_read_back() {
        let store = store().await;
        let created = store.create_download("https://example.com/a").await.unwrap();
        assert_eq!(created.state, DownloadState::Pending);

        let fetched = store.get_download(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.url, "https://example.com/a");
        assert_eq!(fetched.state, DownloadState::Pending);
        assert_eq!(fetched.error_message, None);
        assert!(store.get_download(created.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_rows_are_never_rewritten() {
        let store = store().await;
        let id = store.create_download("https://example.com/a").await.unwrap().id;

        assert!(!store.update_download_state(id, DownloadState::Success, None).await.unwrap());
        assert!(store.update_download_state(id, DownloadState::Progress, None).await.unwrap());
        assert!(
            store
                .update_download_state(id, DownloadState::Error, Some("ERROR: gone"))
                .await
                .unwrap()
        );
        assert!(!store.update_download_state(id, DownloadState::Success, None).await.unwrap());
        assert!(!store.update_download_state(id, DownloadState::Pending, None).await.unwrap());

        let record = store.get_download(id).await.unwrap().unwrap();
        assert_eq!(record.state, DownloadState::Error);
        assert_eq!(record.error_message.as_deref(), Some("ERROR: gone"));
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = store().await;
        let a = store.create_download("https://example.com/a").await.unwrap();
        let b = store.create_download("https://example.com/b").await.unwrap();
        let ids: Vec<_> = store.list_downloads().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, [b.id, a.id]);
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_existed() {
        let store = store().await;
        let id = store.create_download("https://example.com/a").await.unwrap().id;
        assert!(store.delete_download(id).await.unwrap());
        assert!(!store.delete_download(id).await.unwrap());
    }

    #[tokio::test]
    async fn interrupt_marks_unfinished_rows() {
        let store = store().await;
        let done = store.create_download("https://example.com/a").await.unwrap().id;
        store.update_download_state(done, DownloadState::Progress, None).await.unwrap();
        store.update_download_state(done, DownloadState::Success, None).await.unwrap();
        let pending = store.create_download("https://example.com/b").await.unwrap().id;

        assert_eq!(store.interrupt_unfinished("Interrupted by server restart").await.unwrap(), 1);
        let record = store.get_download(pending).await.unwrap().unwrap();
        assert_eq!(record.state, DownloadState::Error);
        assert_eq!(record.error_message.as_deref(), Some("Interrupted by server restart"));
        let record = store.get_download(done).await.unwrap().unwrap();
        assert_eq!(record.state, DownloadState::Success);
    }
}
