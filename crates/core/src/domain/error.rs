// Failure Taxonomy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failure category assigned to a failed probe attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    ToolNotFound,
    Timeout,
    PermissionDenied,
    NetworkError,
    WafDetected,
    RateLimited,
    InvalidTarget,
    Unknown,
    /// Scheduler-level: no executor registered for the probe kind
    NoExecutor,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ToolNotFound => "tool-not-found",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::PermissionDenied => "permission-denied",
            ErrorCategory::NetworkError => "network-error",
            ErrorCategory::WafDetected => "waf-detected",
            ErrorCategory::RateLimited => "rate-limited",
            ErrorCategory::InvalidTarget => "invalid-target",
            ErrorCategory::Unknown => "unknown",
            ErrorCategory::NoExecutor => "no-executor",
        }
    }

    /// Non-retryable categories skip the retry budget and go straight to fallback
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorCategory::ToolNotFound | ErrorCategory::InvalidTarget | ErrorCategory::NoExecutor
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context of one failed attempt; the last one survives into the failure result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub category: ErrorCategory,
    pub probe_kind: String,
    pub target: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub suggestions: Vec<String>,
}
