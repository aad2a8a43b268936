// SQLite Connection Pool Setup

use probeweave_core::port::CacheError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::map_sqlx_error;

/// Create SQLite connection pool with WAL mode.
///
/// In-memory databases are per connection, so they get a single connection.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, CacheError> {
    let in_memory = database_url.contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| CacheError::Unavailable(format!("invalid database url: {}", e)))?
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 10 })
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)
}
