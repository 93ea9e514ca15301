//! Durable store on SQLite.
//!
//! Holds stored documents per link, staged pending articles and the
//! assigned-schedule bindings. The schema is created on connect.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::feed::{NewArticle, PendingArticle, StoredDocument};
use crate::schedule::{AssignedSchedule, AssignedScheduleStore};
use crate::storage::ArticleStore;

const SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS articles (
    feed_url      TEXT NOT NULL,
    article_id    TEXT NOT NULL,
    schedule_name TEXT NOT NULL,
    properties    TEXT NOT NULL DEFAULT '{}',  -- JSON object of tracked comparison values
    PRIMARY KEY (feed_url, article_id)
)
"#,
    r#"
CREATE TABLE IF NOT EXISTS pending_articles (
    id        TEXT PRIMARY KEY,
    article   TEXT NOT NULL,  -- JSON NewArticle
    staged_at TEXT NOT NULL
)
"#,
    r#"
CREATE TABLE IF NOT EXISTS assigned_schedules (
    feed     TEXT NOT NULL,
    shard    INTEGER NOT NULL,
    schedule TEXT NOT NULL,
    url      TEXT NOT NULL,
    guild    TEXT NOT NULL,
    PRIMARY KEY (feed, shard)
)
"#,
];

#[derive(Debug, FromRow)]
struct DocumentRow {
    feed_url: String,
    article_id: String,
    schedule_name: String,
    properties: String,
}

impl TryFrom<DocumentRow> for StoredDocument {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        Ok(StoredDocument {
            id: row.article_id,
            feed_url: row.feed_url,
            schedule_name: row.schedule_name,
            properties: serde_json::from_str::<BTreeMap<String, String>>(&row.properties)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct PendingRow {
    id: String,
    article: String,
    staged_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct AssignedRow {
    feed: String,
    shard: i32,
    schedule: String,
    url: String,
    guild: String,
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(uri: &str, max_connections: u32) -> Result<Self, StoreError> {
        info!(uri, "connecting to article store");
        let options = SqliteConnectOptions::from_str(uri)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Single-connection in-memory database, kept alive for the pool's lifetime.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("article store schema ready");
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for SqliteStore {
    async fn load_documents(
        &self,
        links: &[String],
    ) -> Result<HashMap<String, Vec<StoredDocument>>, StoreError> {
        let mut documents = HashMap::new();
        for link in links {
            let rows = sqlx::query_as::<_, DocumentRow>(
                "SELECT feed_url, article_id, schedule_name, properties FROM articles WHERE feed_url = ?",
            )
            .bind(link)
            .fetch_all(&self.pool)
            .await?;
            if rows.is_empty() {
                continue;
            }
            let docs = rows
                .into_iter()
                .map(StoredDocument::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            documents.insert(link.clone(), docs);
        }
        Ok(documents)
    }

    async fn insert_documents(&self, documents: &[StoredDocument]) -> Result<(), StoreError> {
        if documents.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for doc in documents {
            sqlx::query(
                "INSERT INTO articles (feed_url, article_id, schedule_name, properties) VALUES (?, ?, ?, ?) \
                 ON CONFLICT (feed_url, article_id) DO UPDATE SET properties = excluded.properties",
            )
            .bind(&doc.feed_url)
            .bind(&doc.id)
            .bind(&doc.schedule_name)
            .bind(serde_json::to_string(&doc.properties)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_documents(&self, documents: &[StoredDocument]) -> Result<(), StoreError> {
        if documents.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for doc in documents {
            sqlx::query("UPDATE articles SET properties = ? WHERE feed_url = ? AND article_id = ?")
                .bind(serde_json::to_string(&doc.properties)?)
                .bind(&doc.feed_url)
                .bind(&doc.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn stage_pending_article(
        &self,
        article: &NewArticle,
    ) -> Result<PendingArticle, StoreError> {
        let pending = PendingArticle::stage(article.clone());
        sqlx::query("INSERT INTO pending_articles (id, article, staged_at) VALUES (?, ?, ?)")
            .bind(&pending.id)
            .bind(serde_json::to_string(&pending.article)?)
            .bind(pending.staged_at)
            .execute(&self.pool)
            .await?;
        Ok(pending)
    }

    async fn list_pending_articles(&self) -> Result<Vec<PendingArticle>, StoreError> {
        let rows = sqlx::query_as::<_, PendingRow>(
            "SELECT id, article, staged_at FROM pending_articles ORDER BY staged_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| -> Result<PendingArticle, StoreError> {
                Ok(PendingArticle {
                    id: row.id,
                    article: serde_json::from_str(&row.article)?,
                    staged_at: row.staged_at,
                })
            })
            .collect()
    }

    async fn remove_pending_article(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM pending_articles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AssignedScheduleStore for SqliteStore {
    async fn find_assigned(
        &self,
        feed_id: &str,
        shard: i32,
    ) -> Result<Option<AssignedSchedule>, StoreError> {
        let row = sqlx::query_as::<_, AssignedRow>(
            "SELECT feed, shard, schedule, url, guild FROM assigned_schedules WHERE feed = ? AND shard = ?",
        )
        .bind(feed_id)
        .bind(shard)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| AssignedSchedule {
            feed: row.feed,
            schedule: row.schedule,
            url: row.url,
            guild: row.guild,
            shard: row.shard,
        }))
    }

    async fn save_assigned(&self, record: &AssignedSchedule) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO assigned_schedules (feed, shard, schedule, url, guild) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.feed)
        .bind(record.shard)
        .bind(&record.schedule)
        .bind(&record.url)
        .bind(&record.guild)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_assigned(&self, feed_id: &str, shard: i32) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM assigned_schedules WHERE feed = ? AND shard = ?")
            .bind(feed_id)
            .bind(shard)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
