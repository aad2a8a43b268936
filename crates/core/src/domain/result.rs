// Probe Outcome & Scan Result

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::time::Duration;

use super::error::{ErrorCategory, ErrorContext};
use super::task::ScanTask;

/// Probe payload (JSON object)
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Value returned by one probe invocation and annotated by each wrapping layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub success: bool,
    #[serde(default)]
    pub payload: Payload,
    pub error: Option<String>,
    pub stderr: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
    /// Set by executors that already know why they failed
    pub category: Option<ErrorCategory>,

    // Cache annotations
    #[serde(default)]
    pub from_cache: bool,
    pub cached_at: Option<DateTime<Utc>>,

    // Resilience annotations
    #[serde(default)]
    pub used_alternative: bool,
    pub original_tool: Option<String>,
    pub alternative_tool: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ProbeOutcome {
    pub fn success(payload: Payload) -> Self {
        Self {
            success: true,
            payload,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = Some(stderr.into());
        self
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Terminal failure built from the last error context
    pub fn from_context(ctx: &ErrorContext) -> Self {
        Self {
            success: false,
            error: Some(ctx.message.clone()),
            timed_out: ctx.category == ErrorCategory::Timeout,
            category: Some(ctx.category),
            retry_count: ctx.retry_count,
            suggestions: ctx.suggestions.clone(),
            ..Default::default()
        }
    }

    /// Error message and stderr joined for classification
    pub fn failure_text(&self) -> String {
        format!(
            "{} {}",
            self.error.as_deref().unwrap_or("Unknown error"),
            self.stderr.as_deref().unwrap_or_default()
        )
    }
}

/// Final per-task result returned by the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub probe_kind: String,
    pub target: String,
    pub success: bool,
    pub payload: Payload,
    #[serde(rename = "execution_time_secs", serialize_with = "serialize_secs")]
    pub execution_time: Duration,
    pub error: Option<String>,
    pub timed_out: bool,
    pub from_cache: bool,
    pub cached_at: Option<DateTime<Utc>>,
    pub used_alternative: bool,
    pub original_tool: Option<String>,
    pub alternative_tool: Option<String>,
    pub category: Option<ErrorCategory>,
    pub retry_count: u32,
    pub suggestions: Vec<String>,
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl ScanResult {
    pub fn from_outcome(task: &ScanTask, outcome: ProbeOutcome, execution_time: Duration) -> Self {
        Self {
            probe_kind: task.probe_kind.clone(),
            target: task.target.clone(),
            success: outcome.success,
            payload: outcome.payload,
            execution_time,
            error: outcome.error,
            timed_out: outcome.timed_out,
            from_cache: outcome.from_cache,
            cached_at: outcome.cached_at,
            used_alternative: outcome.used_alternative,
            original_tool: outcome.original_tool,
            alternative_tool: outcome.alternative_tool,
            category: outcome.category,
            retry_count: outcome.retry_count,
            suggestions: outcome.suggestions,
        }
    }

    pub fn failed(
        task: &ScanTask,
        error: impl Into<String>,
        category: ErrorCategory,
        execution_time: Duration,
    ) -> Self {
        let outcome = ProbeOutcome::failure(error).with_category(category);
        Self::from_outcome(task, outcome, execution_time)
    }

    pub fn no_executor(task: &ScanTask) -> Self {
        let mut result = Self::failed(
            task,
            format!("No executor found for {}", task.probe_kind),
            ErrorCategory::NoExecutor,
            Duration::ZERO,
        );
        result.suggestions = vec![format!("Register an executor for {}", task.probe_kind)];
        result
    }

    /// Wait-side timeout: the scheduler stopped waiting after `task.timeout`
    pub fn timed_out(task: &ScanTask) -> Self {
        let mut result = Self::failed(
            task,
            format!("Timeout after {}s", task.timeout.as_secs_f64()),
            ErrorCategory::Timeout,
            task.timeout,
        );
        result.timed_out = true;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_failure_text_joins_stderr() {
        let outcome = ProbeOutcome::failure("exit 1").with_stderr("connection refused");
        assert_eq!(outcome.failure_text(), "exit 1 connection refused");
    }

    #[test]
    fn test_from_context_carries_suggestions() {
        let ctx = ErrorContext {
            category: ErrorCategory::Timeout,
            probe_kind: "nmap".to_string(),
            target: "host".to_string(),
            message: "timed out".to_string(),
            timestamp: Utc.timestamp_millis_opt(0).unwrap(),
            retry_count: 2,
            suggestions: vec!["Increase timeout value".to_string()],
        };

        let outcome = ProbeOutcome::from_context(&ctx);
        assert!(!outcome.success);
        assert!(outcome.timed_out);
        assert_eq!(outcome.retry_count, 2);
        assert_eq!(outcome.category, Some(ErrorCategory::Timeout));
        assert_eq!(outcome.suggestions.len(), 1);
    }

    #[test]
    fn test_timed_out_result() {
        let task = ScanTask::new("httpx", "example.com");
        let result = ScanResult::timed_out(&task);

        assert!(result.timed_out);
        assert!(!result.success);
        assert_eq!(result.execution_time, Duration::from_secs(30));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["execution_time_secs"], serde_json::json!(30.0));
        assert_eq!(json["category"], serde_json::json!("timeout"));
    }
}
