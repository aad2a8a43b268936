// SQLite CacheBackend Implementation

use async_trait::async_trait;
use probeweave_core::port::{CacheBackend, CacheError, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

use crate::map_sqlx_error;

/// Row view of a stored entry
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CacheRow {
    pub key: String,
    pub value: String,
    pub created_at: i64,
    pub expires_at: i64,
}

pub struct SqliteCacheBackend {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteCacheBackend {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    /// Live rows under a prefix, oldest first
    pub async fn rows_with_prefix(&self, prefix: &str) -> Result<Vec<CacheRow>, CacheError> {
        sqlx::query_as::<_, CacheRow>(
            "SELECT key, value, created_at, expires_at FROM cache_entries
             WHERE key LIKE ? ESCAPE '\\' AND expires_at > ?
             ORDER BY created_at, key",
        )
        .bind(like_prefix(prefix))
        .bind(self.time_provider.now_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }
}

// LIKE treats % and _ as wildcards
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl CacheBackend for SqliteCacheBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn ping(&self) -> Result<(), CacheError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        sqlx::query_scalar("SELECT value FROM cache_entries WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(self.time_provider.now_millis())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        let now = self.time_provider.now_millis();
        let expires_at = now.saturating_add((ttl_secs as i64).saturating_mul(1000));

        sqlx::query(
            "INSERT INTO cache_entries (key, value, created_at, expires_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(key, ttl_secs, "Cache row written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(self.time_provider.now_millis())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        sqlx::query_scalar(
            "SELECT key FROM cache_entries WHERE key LIKE ? ESCAPE '\\' AND expires_at > ? ORDER BY key",
        )
        .bind(like_prefix(prefix))
        .bind(self.time_provider.now_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut deleted = 0;
        for key in keys {
            deleted += sqlx::query("DELETE FROM cache_entries WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?
                .rows_affected();
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(deleted)
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(self.time_provider.now_millis())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use probeweave_core::port::time_provider::mocks::ManualClock;
    use std::time::Duration;

    async fn backend() -> (SqliteCacheBackend, Arc<ManualClock>) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        (SqliteCacheBackend::new(pool, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let (backend, clock) = backend().await;
        tokio_test::assert_ok!(backend.ping().await);

        backend.set_with_expiry("k", "v1", 10).await.unwrap();
        backend.set_with_expiry("k", "v2", 10).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v2"));

        clock.advance(Duration::from_secs(10));
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(!backend.delete("k").await.unwrap());
        assert_eq!(backend.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prefix_listing_escapes_wildcards() {
        let (backend, _) = backend().await;
        backend.set_with_expiry("ns:a_b:1", "x", 60).await.unwrap();
        backend.set_with_expiry("ns:axb:1", "x", 60).await.unwrap();
        backend.set_with_expiry("other:1", "x", 60).await.unwrap();

        assert_eq!(backend.keys_with_prefix("ns:a_b:").await.unwrap(), vec!["ns:a_b:1"]);
        assert_eq!(backend.keys_with_prefix("ns:").await.unwrap().len(), 2);

        let rows = backend.rows_with_prefix("ns:").await.unwrap();
        assert!(rows.iter().all(|r| r.expires_at - r.created_at == 60_000));
    }

    #[tokio::test]
    async fn test_delete_many() {
        let (backend, _) = backend().await;
        backend.set_with_expiry("a", "x", 60).await.unwrap();
        backend.set_with_expiry("b", "x", 60).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "missing".to_string()];
        assert_eq!(backend.delete_many(&keys).await.unwrap(), 2);
        assert!(backend.keys_with_prefix("").await.unwrap().is_empty());
    }

    #[test]
    fn test_like_prefix() {
        assert_eq!(like_prefix("a_b%"), "a\\_b\\%%");
    }
}
