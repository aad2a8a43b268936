// Cache Entry Domain Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::Payload;

/// A stored successful probe payload, owned by the result cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub payload: Payload,
    pub created_at: i64, // epoch ms
    pub expires_at: i64, // epoch ms
    pub probe_kind: String,
    pub target: String,
}

impl CacheEntry {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.created_at).unwrap_or_default()
    }
}
