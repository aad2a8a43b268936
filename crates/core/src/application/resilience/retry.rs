// Retry Policy
// Fixed-delay retry budget for retryable failure categories

use std::time::Duration;
use tracing::{info, warn};

use crate::domain::ErrorCategory;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the attempt after this delay
    Retry(Duration),
    /// Stop retrying; try alternatives (or fail)
    Fallback,
}

/// Retry budget for one probe invocation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide what follows a failed attempt.
    ///
    /// `retry_count` is the number of retries already spent.
    pub fn decide(&self, category: ErrorCategory, retry_count: u32) -> RetryDecision {
        if !category.is_retryable() {
            warn!(category = %category, "Non-retryable failure, skipping retry budget");
            return RetryDecision::Fallback;
        }

        if retry_count >= self.max_retries {
            warn!(
                retry_count,
                max_retries = self.max_retries,
                "Max retry attempts reached"
            );
            return RetryDecision::Fallback;
        }

        info!(
            attempt = retry_count + 1,
            max_retries = self.max_retries,
            delay_ms = self.delay.as_millis() as u64,
            "Scheduling retry"
        );
        RetryDecision::Retry(self.delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(2))
    }
}
