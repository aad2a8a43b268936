// Cache Backend Port
// Durable key-value store with per-key expiry (SQLite in infra-sqlite)

use async_trait::async_trait;
use thiserror::Error;

/// Cache errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

/// Durable cache backend.
///
/// Values are opaque serialized entries; expiry is enforced by the backend.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for stats ("sqlite", ...)
    fn name(&self) -> &str;

    /// Connectivity check run once at cache construction
    async fn ping(&self) -> Result<(), CacheError>;

    /// Fetch a live value; expired keys read as absent
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value expiring `ttl_secs` from now
    async fn set_with_expiry(&self, key: &str, value: &str, ttl_secs: u64)
        -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Live keys starting with `prefix`
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError>;

    /// Delete keys, returning how many existed
    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError>;

    /// Drop expired rows; backends with native expiry have nothing to do
    async fn purge_expired(&self) -> Result<u64, CacheError> {
        Ok(0)
    }
}

pub mod mocks {
    use super::*;

    /// Backend that always fails to connect
    #[derive(Debug, Default)]
    pub struct UnreachableBackend;

    #[async_trait]
    impl CacheBackend for UnreachableBackend {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn ping(&self) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn set_with_expiry(
            &self,
            _key: &str,
            _value: &str,
            _ttl_secs: u64,
        ) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn delete_many(&self, _keys: &[String]) -> Result<u64, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
    }
}
