use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use super::{Store, StoreError};

/// SQLite 落库后端。
/// 写入频率远低于探测频率，单连接串行化写即可，不构成瓶颈。
pub struct SqliteStore {
    pool: SqlitePool,
    base_url: String,
}

impl SqliteStore {
    pub async fn connect(path: impl AsRef<Path>, base_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(1500));
        Self::new(options, base_url).await
    }

    /// 内存库，测试用。
    /// 内存库随连接关闭销毁，必须限制为单连接，否则各连接各见一份数据。
    pub async fn connect_in_memory(base_url: &str) -> Result<Self, StoreError> {
        Self::new(SqliteConnectOptions::new().filename(":memory:"), base_url).await
    }

    async fn new(options: SqliteConnectOptions, base_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS valid_ids (
                id TEXT NOT NULL,
                ext TEXT NOT NULL,
                url TEXT NOT NULL,
                PRIMARY KEY (id, ext)
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self {
            pool,
            base_url: base_url.to_string(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn record(&self, id: &str, ext: &str) -> Result<(), StoreError> {
        let url = format!("{}{}{}", self.base_url, id, ext);
        sqlx::query(
            "INSERT INTO valid_ids (id, ext, url) VALUES (?1, ?2, ?3)
             ON CONFLICT (id, ext) DO NOTHING",
        )
        .bind(id)
        .bind(ext)
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn count(store: &SqliteStore) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM valid_ids")
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn record_is_idempotent_on_id_ext_pair() {
        let store = SqliteStore::connect_in_memory("https://files.catbox.moe/")
            .await
            .unwrap();
        store.record("abc123", ".png").await.unwrap();
        store.record("abc123", ".png").await.unwrap();
        assert_eq!(count(&store).await, 1);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn same_id_different_ext_are_distinct_rows() {
        let store = SqliteStore::connect_in_memory("https://files.catbox.moe/")
            .await
            .unwrap();
        store.record("abc123", ".png").await.unwrap();
        store.record("abc123", ".jpg").await.unwrap();
        assert_eq!(count(&store).await, 2);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn stores_full_url() {
        let store = SqliteStore::connect_in_memory("https://files.catbox.moe/")
            .await
            .unwrap();
        store.record("abc123", ".png").await.unwrap();
        let url: String = sqlx::query_scalar("SELECT url FROM valid_ids WHERE id = 'abc123'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(url, "https://files.catbox.moe/abc123.png");
        store.close().await.unwrap();
    }
}
