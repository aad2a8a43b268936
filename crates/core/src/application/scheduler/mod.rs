// Task Scheduler
// Bounded, priority-ordered parallel execution of one scan batch

pub mod constants;
mod panic_guard;

use constants::*;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::domain::{ErrorCategory, ProbeOutcome, ScanResult, ScanTask};
use crate::port::{cancel_pair, IdProvider, ProbeExecutor, ProbeRegistry, UuidProvider};

/// Progress callback: (completed, total, probe_kind), called in completion order
pub type ProgressCallback<'a> = &'a mut (dyn FnMut(usize, usize, &str) + Send);

/// Scanner configuration (`[scanner]` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub max_workers: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

/// Parallel scanner
///
/// At most `max_workers` probes run at once. Each probe runs in its own
/// spawned task so a panic fails only that task. A probe that outlives its
/// timeout is cancelled, then aborted after a grace period.
pub struct ParallelScanner {
    max_workers: usize,
    id_provider: Arc<dyn IdProvider>,
}

impl ParallelScanner {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            max_workers: config.max_workers.max(1),
            id_provider: Arc::new(UuidProvider),
        }
    }

    pub fn with_id_provider(mut self, id_provider: Arc<dyn IdProvider>) -> Self {
        self.id_provider = id_provider;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run one batch to completion; one result per probe kind
    pub async fn execute_parallel(
        &self,
        tasks: Vec<ScanTask>,
        executors: &ProbeRegistry,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> HashMap<String, ScanResult> {
        match on_progress {
            Some(callback) => self.run_batch(tasks, executors, callback).await,
            None => self.run_batch(tasks, executors, &mut |_: usize, _: usize, _: &str| {}).await,
        }
    }

    async fn run_batch(
        &self,
        tasks: Vec<ScanTask>,
        executors: &ProbeRegistry,
        on_progress: ProgressCallback<'_>,
    ) -> HashMap<String, ScanResult> {
        let batch_id = self.id_provider.generate_id();
        let started = Instant::now();
        let tasks = dispatch_order(tasks);
        let total = tasks.len();

        info!(
            batch_id = %batch_id,
            total,
            max_workers = self.max_workers,
            "Starting parallel scan"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut results = HashMap::with_capacity(total);
        let mut running: FuturesUnordered<BoxFuture<'static, Joined>> = FuturesUnordered::new();
        let mut completed = 0;

        for task in tasks {
            let early = match task.validate() {
                Err(e) => Some(ScanResult::failed(
                    &task,
                    e.to_string(),
                    ErrorCategory::InvalidTarget,
                    Duration::ZERO,
                )),
                Ok(()) if !executors.contains(&task.probe_kind) => {
                    warn!(batch_id = %batch_id, probe_kind = %task.probe_kind, "No executor registered");
                    Some(ScanResult::no_executor(&task))
                }
                Ok(()) => None,
            };
            if let Some(result) = early {
                completed += 1;
                on_progress(completed, total, &task.probe_kind);
                results.insert(task.probe_kind.clone(), result);
                continue;
            }
            let Some(executor) = executors.get(&task.probe_kind) else {
                continue;
            };

            // Slots are taken in dispatch order, before spawning
            let acquired = loop {
                tokio::select! {
                    biased;
                    Some((done, joined)) = running.next(), if !running.is_empty() => {
                        completed += 1;
                        on_progress(completed, total, &done.probe_kind);
                        results.insert(done.probe_kind.clone(), settle(&done, joined));
                    }
                    permit = Arc::clone(&semaphore).acquire_owned() => break permit,
                }
            };
            let Ok(permit) = acquired else {
                completed += 1;
                on_progress(completed, total, &task.probe_kind);
                let result = ScanResult::failed(
                    &task,
                    "Worker pool closed",
                    ErrorCategory::Unknown,
                    Duration::ZERO,
                );
                results.insert(task.probe_kind.clone(), result);
                continue;
            };

            debug!(probe_kind = %task.probe_kind, priority = task.priority, "Dispatching");
            let handle = tokio::spawn(run_task(task.clone(), executor, permit));
            running.push(async move { (task, handle.await) }.boxed());
        }

        while let Some((task, joined)) = running.next().await {
            completed += 1;
            on_progress(completed, total, &task.probe_kind);
            results.insert(task.probe_kind.clone(), settle(&task, joined));
        }

        log_summary(&batch_id, &results, started.elapsed());
        results
    }

    /// Run dependency groups one after another, each group in parallel
    pub async fn execute_groups(
        &self,
        groups: Vec<Vec<ScanTask>>,
        executors: &ProbeRegistry,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> HashMap<String, ScanResult> {
        let group_count = groups.len();
        let mut merged = HashMap::new();
        let mut noop = |_: usize, _: usize, _: &str| {};
        let on_progress: ProgressCallback<'_> = match on_progress {
            Some(callback) => callback,
            None => &mut noop,
        };

        for (index, group) in groups.into_iter().enumerate() {
            info!(group = index + 1, group_count, size = group.len(), "Running task group");
            let results = self
                .run_batch(group, executors, &mut *on_progress)
                .await;

            let failed: Vec<&str> = results
                .values()
                .filter(|r| !r.success)
                .map(|r| r.probe_kind.as_str())
                .collect();
            if !failed.is_empty() {
                warn!(group = index + 1, ?failed, "Some tasks in group failed");
            }
            merged.extend(results);
        }
        merged
    }
}

/// Descending priority, stable for ties; later duplicates of a kind are dropped
fn dispatch_order(mut tasks: Vec<ScanTask>) -> Vec<ScanTask> {
    tasks.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut seen = HashSet::new();
    tasks.retain(|task| {
        let first = seen.insert(task.probe_kind.clone());
        if !first {
            warn!(
                probe_kind = %task.probe_kind,
                target = %task.target,
                "Duplicate probe kind in batch, skipping"
            );
        }
        first
    });
    tasks
}

type Joined = (ScanTask, Result<ScanResult, JoinError>);

/// Result of a joined worker; a panicked worker becomes a failed result
fn settle(task: &ScanTask, joined: Result<ScanResult, JoinError>) -> ScanResult {
    joined.unwrap_or_else(|e| {
        let message = panic_guard::join_error_message(&task.probe_kind, e);
        ScanResult::failed(task, message, ErrorCategory::Unknown, Duration::ZERO)
    })
}

/// One worker unit: run the probe with a deadline while holding its slot
async fn run_task(
    task: ScanTask,
    executor: Arc<dyn ProbeExecutor>,
    _permit: OwnedSemaphorePermit,
) -> ScanResult {
    let started = Instant::now();
    let (cancel, token) = cancel_pair();
    let target = task.target.clone();
    let params = task.params.clone();

    // Nested task: a panic surfaces as a JoinError instead of unwinding here
    let mut inner = tokio::spawn(async move {
        match executor.execute(&target, &params, &token).await {
            Ok(outcome) => outcome,
            Err(e) => ProbeOutcome::from(e),
        }
    });

    match tokio::time::timeout(task.timeout, &mut inner).await {
        Ok(Ok(outcome)) => {
            let elapsed = started.elapsed();
            debug!(
                probe_kind = %task.probe_kind,
                success = outcome.success,
                elapsed_ms = elapsed.as_millis() as u64,
                "Probe finished"
            );
            ScanResult::from_outcome(&task, outcome, elapsed)
        }
        Ok(Err(join_err)) => {
            let message = panic_guard::join_error_message(&task.probe_kind, join_err);
            ScanResult::failed(&task, message, ErrorCategory::Unknown, started.elapsed())
        }
        Err(_) => {
            warn!(
                probe_kind = %task.probe_kind,
                target = %task.target,
                timeout_secs = task.timeout.as_secs_f64(),
                "Probe timed out, cancelling"
            );
            cancel.cancel();
            if tokio::time::timeout(CANCEL_GRACE_PERIOD, &mut inner)
                .await
                .is_err()
            {
                warn!(probe_kind = %task.probe_kind, "Probe ignored cancellation, aborting");
                inner.abort();
            }
            ScanResult::timed_out(&task)
        }
    }
}

fn log_summary(batch_id: &str, results: &HashMap<String, ScanResult>, wall_time: Duration) {
    let total = results.len();
    let successful = results.values().filter(|r| r.success).count();
    let total_time: Duration = results.values().map(|r| r.execution_time).sum();
    let avg_time_secs = if total > 0 {
        total_time.as_secs_f64() / total as f64
    } else {
        0.0
    };

    info!(
        batch_id = %batch_id,
        total,
        successful,
        failed = total - successful,
        total_time_secs = total_time.as_secs_f64(),
        avg_time_secs,
        wall_time_secs = wall_time.as_secs_f64(),
        "Parallel scan completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProbeParams;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::probe_executor::mocks::{InFlightGauge, MockBehavior, MockProbe};
    use std::sync::Mutex;

    fn scanner(width: usize) -> ParallelScanner {
        ParallelScanner::new(&ScannerConfig { max_workers: width })
            .with_id_provider(Arc::new(SequentialIdProvider::default()))
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let gauge = Arc::new(InFlightGauge::default());
        let mut registry = ProbeRegistry::new();
        let mut tasks = Vec::new();
        for i in 0..10 {
            let kind = format!("probe-{}", i);
            let probe = MockProbe::succeeding()
                .with_delay(Duration::from_millis(20))
                .with_gauge(gauge.clone());
            registry.register(kind.clone(), Arc::new(probe));
            tasks.push(ScanTask::new(kind, "host"));
        }

        let results = scanner(3).execute_parallel(tasks, &registry, None).await;

        assert_eq!(results.len(), 10);
        assert!(results.values().all(|r| r.success));
        assert!(gauge.peak() <= 3, "peak in flight was {}", gauge.peak());
        assert!(gauge.peak() >= 2);
    }

    #[tokio::test]
    async fn test_priority_dispatch_with_single_worker() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ProbeRegistry::new();
        for kind in ["x", "y"] {
            let order = order.clone();
            let probe = crate::port::FnProbe::new(move |_target: &str, _params: &ProbeParams| {
                order.lock().unwrap().push(kind.to_string());
                if kind == "x" {
                    Ok(ProbeOutcome::failure("x broke"))
                } else {
                    Ok(ProbeOutcome::success(Default::default()))
                }
            });
            registry.register(kind, Arc::new(probe));
        }
        let tasks = vec![
            ScanTask::new("x", "t").with_priority(1),
            ScanTask::new("y", "t").with_priority(5),
        ];

        let results = scanner(1).execute_parallel(tasks, &registry, None).await;

        assert_eq!(*order.lock().unwrap(), vec!["y", "x"]);
        assert!(results["y"].success);
        assert!(!results["x"].success);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_priority_order_holds_on_multi_thread_runtime() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ProbeRegistry::new();
        for i in 0..8 {
            let kind = format!("k{}", i);
            let order = order.clone();
            let recorded = kind.clone();
            let probe = crate::port::FnProbe::new(move |_target: &str, _params: &ProbeParams| {
                order.lock().unwrap().push(recorded.clone());
                Ok(ProbeOutcome::success(Default::default()))
            });
            registry.register(kind, Arc::new(probe));
        }
        let expected: Vec<String> = (0..8).rev().map(|i| format!("k{}", i)).collect();

        for round in 0..20 {
            order.lock().unwrap().clear();
            let tasks = (0..8)
                .map(|i| ScanTask::new(format!("k{}", i), "t").with_priority(i))
                .collect();

            let results = scanner(1).execute_parallel(tasks, &registry, None).await;

            assert_eq!(results.len(), 8);
            assert_eq!(*order.lock().unwrap(), expected, "round {}", round);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_progress_reported_while_waiting_for_slots() {
        let mut registry = ProbeRegistry::new();
        let mut tasks = Vec::new();
        for i in 0..6 {
            let kind = format!("w{}", i);
            let probe = MockProbe::succeeding().with_delay(Duration::from_millis(10));
            registry.register(kind.clone(), Arc::new(probe));
            tasks.push(ScanTask::new(kind, "t"));
        }

        let mut seen = Vec::new();
        let mut record = |done: usize, total: usize, _: &str| seen.push((done, total));
        let results = scanner(2)
            .execute_parallel(tasks, &registry, Some(&mut record))
            .await;

        assert_eq!(results.len(), 6);
        assert_eq!(seen, (1..=6).map(|n| (n, 6)).collect::<Vec<_>>());
    }

    #[test]
    fn test_dispatch_order_is_stable() {
        let tasks = vec![
            ScanTask::new("a", "t").with_priority(1),
            ScanTask::new("b", "t").with_priority(3),
            ScanTask::new("c", "t").with_priority(1),
            ScanTask::new("a", "other").with_priority(9),
        ];
        let kinds: Vec<(String, String)> = dispatch_order(tasks)
            .into_iter()
            .map(|t| (t.probe_kind, t.target))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("a".to_string(), "other".to_string()),
                ("b".to_string(), "t".to_string()),
                ("c".to_string(), "t".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_executor_and_progress() {
        let registry =
            ProbeRegistry::new().with("httpx", Arc::new(MockProbe::succeeding()));
        let tasks = vec![ScanTask::new("httpx", "t"), ScanTask::new("ghost", "t")];

        let mut seen = Vec::new();
        let mut callback = |done: usize, total: usize, kind: &str| {
            seen.push((done, total, kind.to_string()));
        };
        let results = scanner(2)
            .execute_parallel(tasks, &registry, Some(&mut callback))
            .await;

        let ghost = &results["ghost"];
        assert!(!ghost.success);
        assert_eq!(ghost.category, Some(ErrorCategory::NoExecutor));
        assert!(results["httpx"].success);

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (1, 2, "ghost".to_string()));
        assert_eq!(seen[1], (2, 2, "httpx".to_string()));
    }

    #[tokio::test]
    async fn test_timeout_cancels_probe() {
        let slow = Arc::new(MockProbe::succeeding().with_delay(Duration::from_secs(30)));
        let registry = ProbeRegistry::new().with("nmap", slow.clone() as Arc<dyn ProbeExecutor>);
        let tasks = vec![ScanTask::new("nmap", "t").with_timeout(Duration::from_millis(50))];

        let started = Instant::now();
        let results = scanner(1).execute_parallel(tasks, &registry, None).await;

        let result = &results["nmap"];
        assert!(result.timed_out);
        assert!(!result.success);
        assert_eq!(result.category, Some(ErrorCategory::Timeout));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(slow.cancellation_count(), 1);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let registry = ProbeRegistry::new()
            .with(
                "bad",
                Arc::new(MockProbe::new(MockBehavior::Panic("kaboom".into()))),
            )
            .with("good", Arc::new(MockProbe::succeeding()));
        let tasks = vec![ScanTask::new("bad", "t"), ScanTask::new("good", "t")];

        let results = scanner(2).execute_parallel(tasks, &registry, None).await;

        assert!(results["good"].success);
        let bad = &results["bad"];
        assert!(!bad.success);
        assert!(bad.error.as_deref().unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_execution_error_becomes_failed_result() {
        let registry = ProbeRegistry::new().with(
            "nmap",
            Arc::new(MockProbe::new(MockBehavior::Error(
                crate::port::ExecutionError::SpawnFailed("no fork".into()),
            ))),
        );
        let results = scanner(1)
            .execute_parallel(vec![ScanTask::new("nmap", "t")], &registry, None)
            .await;
        assert_eq!(results["nmap"].error.as_deref(), Some("Spawn failed: no fork"));
    }

    #[tokio::test]
    async fn test_invalid_task_fails_fast() {
        let probe = Arc::new(MockProbe::succeeding());
        let registry = ProbeRegistry::new().with("nmap", probe.clone() as Arc<dyn ProbeExecutor>);
        let results = scanner(1)
            .execute_parallel(vec![ScanTask::new("nmap", "")], &registry, None)
            .await;

        assert_eq!(results["nmap"].category, Some(ErrorCategory::InvalidTarget));
        assert_eq!(probe.call_count(), 0);
    }

    #[tokio::test]
    async fn test_groups_run_in_sequence() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ProbeRegistry::new();
        for kind in ["subfinder", "httpx", "nuclei"] {
            let order = order.clone();
            registry.register(
                kind,
                Arc::new(crate::port::FnProbe::new(move |_: &str, _: &ProbeParams| {
                    order.lock().unwrap().push(kind);
                    Ok(ProbeOutcome::success(Default::default()))
                })),
            );
        }
        let groups = vec![
            vec![ScanTask::new("subfinder", "t")],
            vec![ScanTask::new("httpx", "t"), ScanTask::new("nuclei", "t")],
        ];

        let mut calls = 0;
        let mut callback = |_: usize, _: usize, _: &str| calls += 1;
        let results = scanner(4)
            .execute_groups(groups, &registry, Some(&mut callback))
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(order.lock().unwrap()[0], "subfinder");
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let results = scanner(2)
            .execute_parallel(Vec::new(), &ProbeRegistry::new(), None)
            .await;
        assert!(results.is_empty());
    }
}
