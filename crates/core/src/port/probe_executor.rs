// Probe Executor Port
// Abstraction over one security tool (subprocess, in-process, or a decorator)

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::cancel::CancelToken;
use crate::domain::{ErrorCategory, ProbeOutcome, ProbeParams};

/// Execution errors raised instead of returning a failed outcome
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(String),

    #[error("{0}")]
    Other(String),
}

impl ExecutionError {
    /// Category known without looking at the message text
    pub fn category_hint(&self) -> Option<ErrorCategory> {
        match self {
            ExecutionError::ToolNotFound(_) => Some(ErrorCategory::ToolNotFound),
            ExecutionError::InvalidTarget(_) => Some(ErrorCategory::InvalidTarget),
            ExecutionError::Cancelled => Some(ErrorCategory::Timeout),
            _ => None,
        }
    }
}

impl From<ExecutionError> for ProbeOutcome {
    fn from(err: ExecutionError) -> Self {
        let category = err.category_hint();
        let mut outcome = ProbeOutcome::failure(err.to_string());
        outcome.category = category;
        outcome.timed_out = matches!(err, ExecutionError::Cancelled);
        outcome
    }
}

/// Probe Executor trait
///
/// Implementations:
/// - CommandProbe (infra-system): spawns the external tool
/// - FnProbe: runs a blocking closure
/// - CachedProbe / ResilientProbe: decorators added by the orchestrator
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    /// Run the probe once against `target`.
    ///
    /// A tool that ran but failed is reported as `Ok` with `success == false`.
    /// `Err` is reserved for failures to run the tool at all.
    /// Implementations must stop promptly once `cancel` fires.
    async fn execute(
        &self,
        target: &str,
        params: &ProbeParams,
        cancel: &CancelToken,
    ) -> Result<ProbeOutcome, ExecutionError>;
}

/// Probe kind -> executor lookup
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    executors: HashMap<String, Arc<dyn ProbeExecutor>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn ProbeExecutor>) {
        self.executors.insert(kind.into(), executor);
    }

    pub fn with(mut self, kind: impl Into<String>, executor: Arc<dyn ProbeExecutor>) -> Self {
        self.register(kind, executor);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ProbeExecutor>> {
        self.executors.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.executors.contains_key(kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn ProbeExecutor>)> {
        self.executors.iter()
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.executors.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Blocking closure adapted to the executor port.
///
/// The closure runs on the blocking pool; cancellation abandons the wait.
pub struct FnProbe<F> {
    func: Arc<F>,
}

impl<F> FnProbe<F>
where
    F: Fn(&str, &ProbeParams) -> Result<ProbeOutcome, ExecutionError> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl<F> ProbeExecutor for FnProbe<F>
where
    F: Fn(&str, &ProbeParams) -> Result<ProbeOutcome, ExecutionError> + Send + Sync + 'static,
{
    async fn execute(
        &self,
        target: &str,
        params: &ProbeParams,
        cancel: &CancelToken,
    ) -> Result<ProbeOutcome, ExecutionError> {
        let func = Arc::clone(&self.func);
        let target = target.to_string();
        let params = params.clone();
        let handle = tokio::task::spawn_blocking(move || func(&target, &params));

        tokio::select! {
            joined = handle => match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(ExecutionError::Other("probe panicked".to_string())),
                Err(e) => Err(ExecutionError::Other(e.to_string())),
            },
            _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
        }
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::Payload;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock probe behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Succeed with this payload
        Succeed(Payload),
        /// Ran but failed: (error, stderr)
        Fail(String, Option<String>),
        /// Could not run at all
        Error(ExecutionError),
        /// Panic with message (for panic isolation testing)
        Panic(String),
    }

    impl MockBehavior {
        pub fn ok(key: &str, value: serde_json::Value) -> Self {
            let mut payload = Payload::new();
            payload.insert(key.to_string(), value);
            MockBehavior::Succeed(payload)
        }

        pub fn fail(error: impl Into<String>) -> Self {
            MockBehavior::Fail(error.into(), None)
        }
    }

    /// Scripted probe: plays behaviors in order, the last one repeats
    pub struct MockProbe {
        script: Mutex<Vec<MockBehavior>>,
        delay: Option<Duration>,
        calls: AtomicUsize,
        cancellations: AtomicUsize,
        gauge: Arc<InFlightGauge>,
    }

    /// Concurrent invocation counter shared between probes
    #[derive(Debug, Default)]
    pub struct InFlightGauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl InFlightGauge {
        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        pub fn current(&self) -> usize {
            self.current.load(Ordering::SeqCst)
        }

        fn enter(self: &Arc<Self>) -> GaugeGuard {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            GaugeGuard(Arc::clone(self))
        }
    }

    struct GaugeGuard(Arc<InFlightGauge>);

    impl Drop for GaugeGuard {
        fn drop(&mut self) {
            self.0.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl MockProbe {
        pub fn new(behavior: MockBehavior) -> Self {
            Self::scripted(vec![behavior])
        }

        pub fn scripted(script: Vec<MockBehavior>) -> Self {
            Self {
                script: Mutex::new(script),
                delay: None,
                calls: AtomicUsize::new(0),
                cancellations: AtomicUsize::new(0),
                gauge: Arc::new(InFlightGauge::default()),
            }
        }

        pub fn succeeding() -> Self {
            Self::new(MockBehavior::ok("status", serde_json::json!("ok")))
        }

        pub fn failing(error: impl Into<String>) -> Self {
            Self::new(MockBehavior::fail(error))
        }

        /// Sleep before answering; the sleep observes cancellation
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn with_gauge(mut self, gauge: Arc<InFlightGauge>) -> Self {
            self.gauge = gauge;
            self
        }

        pub fn gauge(&self) -> Arc<InFlightGauge> {
            Arc::clone(&self.gauge)
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn cancellation_count(&self) -> usize {
            self.cancellations.load(Ordering::SeqCst)
        }

        fn next_behavior(&self) -> MockBehavior {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script
                    .first()
                    .cloned()
                    .unwrap_or_else(|| MockBehavior::fail("empty script"))
            }
        }
    }

    #[async_trait]
    impl ProbeExecutor for MockProbe {
        async fn execute(
            &self,
            target: &str,
            _params: &ProbeParams,
            cancel: &CancelToken,
        ) -> Result<ProbeOutcome, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _guard = self.gauge.enter();
            let behavior = self.next_behavior();

            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        self.cancellations.fetch_add(1, Ordering::SeqCst);
                        return Err(ExecutionError::Cancelled);
                    }
                }
            }

            match behavior {
                MockBehavior::Succeed(mut payload) => {
                    payload
                        .entry("target".to_string())
                        .or_insert_with(|| serde_json::json!(target));
                    Ok(ProbeOutcome::success(payload))
                }
                MockBehavior::Fail(error, stderr) => {
                    let mut outcome = ProbeOutcome::failure(error);
                    outcome.stderr = stderr;
                    Ok(outcome)
                }
                MockBehavior::Error(err) => Err(err),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
            }
        }
    }
}
