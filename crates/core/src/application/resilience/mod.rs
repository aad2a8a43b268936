// Resilient Executor
// Retry on transient failure, fall back to alternative tools, never raise

mod alternatives;
pub mod diagnostics;
mod retry;

pub use alternatives::SubstitutionTable;
pub use retry::{RetryDecision, RetryPolicy};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::{ErrorCategory, ErrorContext, ProbeOutcome, ProbeParams};
use crate::port::{
    CancelToken, ExecutionError, ProbeExecutor, ProbeRegistry, SystemTimeProvider, TimeProvider,
    ToolRegistry,
};

/// Resilience configuration (`[resilience]` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_fallback: bool,
    /// Added to or replacing built-in substitution entries
    pub alternatives: HashMap<String, Vec<String>>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 2000,
            enable_fallback: true,
            alternatives: HashMap::new(),
        }
    }
}

impl ResilienceConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn substitution_table(&self) -> SubstitutionTable {
        let mut table = SubstitutionTable::builtin();
        table.extend(self.alternatives.clone());
        table
    }
}

/// Per-invocation state
#[derive(Debug)]
enum State {
    Attempting { retry_count: u32 },
    Retrying { retry_count: u32, delay: Duration },
    FallingBack(ErrorContext),
    Succeeded(ProbeOutcome),
    Failed(ErrorContext),
}

/// Wraps one probe invocation with retry and fallback
pub struct ResilientExecutor {
    policy: RetryPolicy,
    enable_fallback: bool,
    table: SubstitutionTable,
    tools: Arc<dyn ToolRegistry>,
    clock: Arc<dyn TimeProvider>,
}

impl ResilientExecutor {
    pub fn new(config: &ResilienceConfig, tools: Arc<dyn ToolRegistry>) -> Self {
        Self {
            policy: config.retry_policy(),
            enable_fallback: config.enable_fallback,
            table: config.substitution_table(),
            tools,
            clock: Arc::new(SystemTimeProvider),
        }
    }

    pub fn with_table(mut self, table: SubstitutionTable) -> Self {
        self.table = table;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    pub fn table(&self) -> &SubstitutionTable {
        &self.table
    }

    /// Run `executor` for `probe_kind` to a terminal outcome.
    ///
    /// Alternatives are looked up in `all_executors` by kind.
    pub async fn execute_with_resilience(
        &self,
        probe_kind: &str,
        target: &str,
        params: &ProbeParams,
        executor: &dyn ProbeExecutor,
        all_executors: &ProbeRegistry,
        cancel: &CancelToken,
    ) -> ProbeOutcome {
        let mut state = State::Attempting { retry_count: 0 };

        loop {
            state = match state {
                State::Attempting { retry_count } => {
                    info!(
                        probe_kind,
                        attempt = retry_count + 1,
                        max_attempts = self.policy.max_retries() + 1,
                        "Executing probe"
                    );
                    let outcome = attempt(executor, target, params, cancel).await;
                    if outcome.success {
                        if retry_count > 0 {
                            info!(probe_kind, retry_count, "Probe succeeded after retries");
                        }
                        State::Succeeded(ProbeOutcome {
                            retry_count,
                            ..outcome
                        })
                    } else {
                        let ctx = self.diagnose(probe_kind, target, &outcome, retry_count);
                        self.after_failure(ctx, cancel)
                    }
                }

                State::Retrying { retry_count, delay } => {
                    warn!(
                        probe_kind,
                        delay_ms = delay.as_millis() as u64,
                        "Probe failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => State::Attempting {
                            retry_count: retry_count + 1,
                        },
                        _ = cancel.cancelled() => State::Failed(self.context(
                            probe_kind,
                            target,
                            ErrorCategory::Timeout,
                            "Cancelled during retry backoff".to_string(),
                            retry_count,
                        )),
                    }
                }

                State::FallingBack(ctx) => {
                    match self
                        .try_alternatives(probe_kind, target, params, all_executors, cancel)
                        .await
                    {
                        Some(mut outcome) => {
                            outcome.retry_count = ctx.retry_count;
                            State::Succeeded(outcome)
                        }
                        None if cancel.is_cancelled() => State::Failed(self.as_timeout(ctx)),
                        None => State::Failed(ctx),
                    }
                }

                State::Succeeded(outcome) => return outcome,

                State::Failed(ctx) => {
                    warn!(
                        probe_kind,
                        target,
                        category = %ctx.category,
                        retry_count = ctx.retry_count,
                        "Probe failed after recovery"
                    );
                    return ProbeOutcome::from_context(&ctx);
                }
            };
        }
    }

    fn after_failure(&self, ctx: ErrorContext, cancel: &CancelToken) -> State {
        if cancel.is_cancelled() {
            return State::Failed(self.as_timeout(ctx));
        }
        match self.policy.decide(ctx.category, ctx.retry_count) {
            RetryDecision::Retry(delay) => State::Retrying {
                retry_count: ctx.retry_count,
                delay,
            },
            RetryDecision::Fallback if self.enable_fallback => State::FallingBack(ctx),
            RetryDecision::Fallback => State::Failed(ctx),
        }
    }

    /// A failure observed after cancellation ends as a timeout
    fn as_timeout(&self, ctx: ErrorContext) -> ErrorContext {
        self.context(
            &ctx.probe_kind,
            &ctx.target,
            ErrorCategory::Timeout,
            ctx.message,
            ctx.retry_count,
        )
    }

    async fn try_alternatives(
        &self,
        original: &str,
        target: &str,
        params: &ProbeParams,
        all_executors: &ProbeRegistry,
        cancel: &CancelToken,
    ) -> Option<ProbeOutcome> {
        let alternatives = self.table.alternatives(original);
        if alternatives.is_empty() {
            debug!(probe_kind = original, "No alternatives configured");
            return None;
        }
        info!(probe_kind = original, ?alternatives, "Trying alternatives");

        for alt in alternatives {
            if cancel.is_cancelled() {
                return None;
            }
            if !self.tools.is_available(alt) {
                debug!(alternative = %alt, "Skipping alternative (not installed)");
                continue;
            }
            let Some(executor) = all_executors.get(alt) else {
                debug!(alternative = %alt, "Skipping alternative (no executor)");
                continue;
            };

            info!(probe_kind = original, alternative = %alt, "Trying alternative");
            let outcome = attempt(executor.as_ref(), target, params, cancel).await;
            if outcome.success {
                info!(probe_kind = original, alternative = %alt, "Alternative succeeded");
                return Some(ProbeOutcome {
                    used_alternative: true,
                    original_tool: Some(original.to_string()),
                    alternative_tool: Some(alt.clone()),
                    ..outcome
                });
            }
            warn!(alternative = %alt, error = ?outcome.error, "Alternative failed");
        }
        None
    }

    fn diagnose(
        &self,
        probe_kind: &str,
        target: &str,
        outcome: &ProbeOutcome,
        retry_count: u32,
    ) -> ErrorContext {
        let category = outcome
            .category
            .unwrap_or_else(|| diagnostics::classify(&outcome.failure_text()));
        let message = outcome
            .error
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string());
        self.context(probe_kind, target, category, message, retry_count)
    }

    fn context(
        &self,
        probe_kind: &str,
        target: &str,
        category: ErrorCategory,
        message: String,
        retry_count: u32,
    ) -> ErrorContext {
        let suggestions = diagnostics::suggestions(
            category,
            probe_kind,
            target,
            self.tools.as_ref(),
            self.table.alternatives(probe_kind),
        );
        ErrorContext {
            category,
            probe_kind: probe_kind.to_string(),
            target: target.to_string(),
            message,
            timestamp: self.clock.now_utc(),
            retry_count,
            suggestions,
        }
    }
}

/// One call into an executor, with `Err` folded into a failed outcome
async fn attempt(
    executor: &dyn ProbeExecutor,
    target: &str,
    params: &ProbeParams,
    cancel: &CancelToken,
) -> ProbeOutcome {
    match executor.execute(target, params, cancel).await {
        Ok(outcome) => outcome,
        Err(e) => ProbeOutcome::from(e),
    }
}

/// Executor decorator applying [`ResilientExecutor`] to an inner probe
pub struct ResilientProbe {
    probe_kind: String,
    inner: Arc<dyn ProbeExecutor>,
    fallbacks: Arc<ProbeRegistry>,
    resilience: Arc<ResilientExecutor>,
}

impl ResilientProbe {
    pub fn new(
        probe_kind: impl Into<String>,
        inner: Arc<dyn ProbeExecutor>,
        fallbacks: Arc<ProbeRegistry>,
        resilience: Arc<ResilientExecutor>,
    ) -> Self {
        Self {
            probe_kind: probe_kind.into(),
            inner,
            fallbacks,
            resilience,
        }
    }
}

#[async_trait]
impl ProbeExecutor for ResilientProbe {
    async fn execute(
        &self,
        target: &str,
        params: &ProbeParams,
        cancel: &CancelToken,
    ) -> Result<ProbeOutcome, ExecutionError> {
        Ok(self
            .resilience
            .execute_with_resilience(
                &self.probe_kind,
                target,
                params,
                self.inner.as_ref(),
                &self.fallbacks,
                cancel,
            )
            .await)
    }
}
