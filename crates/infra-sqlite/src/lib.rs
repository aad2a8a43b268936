// Probeweave Infrastructure - SQLite Adapter
// Implements: CacheBackend (durable result cache)

mod cache_backend;
mod connection;
mod migration;

pub use cache_backend::{CacheRow, SqliteCacheBackend};
pub use connection::create_pool;
pub use migration::run_migrations;

use probeweave_core::port::CacheError;

/// Open (and migrate) a cache database in one step
pub async fn open_cache_db(database_url: &str) -> Result<sqlx::SqlitePool, CacheError> {
    let pool = create_pool(database_url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

// Helper to convert sqlx::Error to CacheError with structured information.
// Orphan rules: From<sqlx::Error> cannot be implemented for a core type here.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> CacheError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            // SQLite error codes: https://www.sqlite.org/rescode.html
            Some(code) if code.as_ref() == "5" => {
                CacheError::Backend(format!("Database locked (SQLITE_BUSY): {}", db_err.message()))
            }
            Some(code) if code.as_ref() == "13" => {
                CacheError::Backend(format!("Database full: {}", db_err.message()))
            }
            Some(code) => CacheError::Backend(format!(
                "Database error [{}]: {}",
                code.as_ref(),
                db_err.message()
            )),
            None => CacheError::Backend(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            CacheError::Unavailable(err.to_string())
        }
        sqlx::Error::ColumnNotFound(col) => CacheError::Backend(format!("Column not found: {}", col)),
        _ => CacheError::Backend(err.to_string()),
    }
}
