// Cache-Aware Execution
// Serve hits from the result cache, store successful misses

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::cache::ResultCache;
use crate::domain::{ProbeOutcome, ProbeParams};
use crate::port::{CancelToken, ExecutionError, ProbeExecutor};

/// Per-batch cache behavior
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePolicy {
    /// Skip the lookup but still store a fresh success
    pub force_refresh: bool,
    /// Scan class used for TTL selection
    pub scan_class: Option<String>,
}

impl CachePolicy {
    pub fn new(scan_class: Option<String>, force_refresh: bool) -> Self {
        Self {
            force_refresh,
            scan_class,
        }
    }
}

/// Run `raw` for `probe_kind` through the cache.
///
/// Never fails: an executor error comes back as a failed outcome, uncached.
pub async fn execute_with_cache(
    cache: &ResultCache,
    probe_kind: &str,
    target: &str,
    params: &ProbeParams,
    raw: &dyn ProbeExecutor,
    policy: &CachePolicy,
    cancel: &CancelToken,
) -> ProbeOutcome {
    if !policy.force_refresh {
        if let Some(entry) = cache.lookup(probe_kind, target, params).await {
            let cached_at = entry.cached_at();
            let mut outcome = ProbeOutcome::success(entry.payload);
            outcome.from_cache = true;
            outcome.cached_at = Some(cached_at);
            return outcome;
        }
    }

    let mut outcome = match raw.execute(target, params, cancel).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(probe_kind, target, error = %e, "Probe raised an execution error");
            ProbeOutcome::from(e)
        }
    };

    if outcome.success {
        cache
            .set(
                probe_kind,
                target,
                params,
                &outcome.payload,
                policy.scan_class.as_deref(),
                None,
            )
            .await;
    } else {
        debug!(probe_kind, target, "Failed result not cached");
    }

    outcome.from_cache = false;
    outcome
}

/// Executor decorator applying [`execute_with_cache`] to an inner probe
pub struct CachedProbe {
    probe_kind: String,
    inner: Arc<dyn ProbeExecutor>,
    cache: Arc<ResultCache>,
    policy: CachePolicy,
}

impl CachedProbe {
    pub fn new(
        probe_kind: impl Into<String>,
        inner: Arc<dyn ProbeExecutor>,
        cache: Arc<ResultCache>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            probe_kind: probe_kind.into(),
            inner,
            cache,
            policy,
        }
    }
}

#[async_trait]
impl ProbeExecutor for CachedProbe {
    async fn execute(
        &self,
        target: &str,
        params: &ProbeParams,
        cancel: &CancelToken,
    ) -> Result<ProbeOutcome, ExecutionError> {
        Ok(execute_with_cache(
            &self.cache,
            &self.probe_kind,
            target,
            params,
            self.inner.as_ref(),
            &self.policy,
            cancel,
        )
        .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::cache::TtlPolicy;
    use crate::domain::ErrorCategory;
    use crate::port::probe_executor::mocks::{MockBehavior, MockProbe};

    fn cache() -> Arc<ResultCache> {
        Arc::new(ResultCache::in_memory(TtlPolicy::builtin()))
    }

    #[tokio::test]
    async fn test_hit_skips_executor() {
        let cache = cache();
        let probe = MockProbe::succeeding();
        let params = ProbeParams::new();
        let never = CancelToken::never();
        let policy = CachePolicy::default();

        let first = execute_with_cache(&cache, "httpx", "t", &params, &probe, &policy, &never).await;
        assert!(first.success);
        assert!(!first.from_cache);

        let second = execute_with_cache(&cache, "httpx", "t", &params, &probe, &policy, &never).await;
        assert!(second.from_cache);
        assert!(second.cached_at.is_some());
        assert_eq!(second.payload, first.payload);
        assert_eq!(probe.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = cache();
        let probe = MockProbe::failing("exit status 2");
        let params = ProbeParams::new();
        let never = CancelToken::never();

        let outcome = execute_with_cache(
            &cache,
            "nmap",
            "t",
            &params,
            &probe,
            &CachePolicy::default(),
            &never,
        )
        .await;

        assert!(!outcome.success);
        assert!(cache.get("nmap", "t", &params).await.is_none());
    }

    #[tokio::test]
    async fn test_force_refresh_runs_and_restores() {
        let cache = cache();
        let probe = MockProbe::scripted(vec![
            MockBehavior::ok("n", serde_json::json!(1)),
            MockBehavior::ok("n", serde_json::json!(2)),
        ]);
        let params = ProbeParams::new();
        let never = CancelToken::never();

        execute_with_cache(&cache, "nmap", "t", &params, &probe, &CachePolicy::default(), &never)
            .await;
        let refreshed = execute_with_cache(
            &cache,
            "nmap",
            "t",
            &params,
            &probe,
            &CachePolicy::new(None, true),
            &never,
        )
        .await;

        assert!(!refreshed.from_cache);
        assert_eq!(probe.call_count(), 2);
        let stored = cache.get("nmap", "t", &params).await.unwrap();
        assert_eq!(stored["n"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_execution_error_becomes_outcome() {
        let cache = cache();
        let probe = MockProbe::new(MockBehavior::Error(ExecutionError::ToolNotFound(
            "nmap".into(),
        )));
        let decorated = CachedProbe::new("nmap", Arc::new(probe), cache, CachePolicy::default());

        let outcome = decorated
            .execute("t", &ProbeParams::new(), &CancelToken::never())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.category, Some(ErrorCategory::ToolNotFound));
    }
}
