// Orchestration Facade
// Composes cache and resilience around raw probes and hands them to the scanner

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::cache::{CacheConfig, ResultCache};
use super::cache_aware::{self, CachePolicy, CachedProbe};
use super::resilience::{ResilienceConfig, ResilientExecutor, ResilientProbe};
use super::scheduler::{ParallelScanner, ProgressCallback, ScannerConfig};
use crate::domain::{ProbeOutcome, ProbeParams, ScanResult, ScanTask};
use crate::error::{AppError, Result};
use crate::port::{CancelToken, IdProvider, ProbeExecutor, ProbeRegistry, ToolRegistry};

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub scanner: ScannerConfig,
    pub resilience: ResilienceConfig,
    pub cache: CacheConfig,
}

/// Explicit engine context; one per process or per test
pub struct Orchestrator {
    scanner: ParallelScanner,
    resilience: Arc<ResilientExecutor>,
    cache: Arc<ResultCache>,
    cache_enabled: bool,
    raw: ProbeRegistry,
}

impl Orchestrator {
    pub fn new(
        config: &OrchestratorConfig,
        cache: Arc<ResultCache>,
        tools: Arc<dyn ToolRegistry>,
        raw: ProbeRegistry,
    ) -> Result<Self> {
        if config.scanner.max_workers == 0 {
            return Err(AppError::Config(
                "scanner.max_workers must be at least 1".to_string(),
            ));
        }

        info!(
            probes = raw.len(),
            max_workers = config.scanner.max_workers,
            cache_backend = cache.backend_kind(),
            cache_enabled = config.cache.enabled,
            "Orchestrator initialized"
        );

        Ok(Self {
            scanner: ParallelScanner::new(&config.scanner),
            resilience: Arc::new(ResilientExecutor::new(&config.resilience, tools)),
            cache,
            cache_enabled: config.cache.enabled,
            raw,
        })
    }

    pub fn with_id_provider(mut self, id_provider: Arc<dyn IdProvider>) -> Self {
        self.scanner = self.scanner.with_id_provider(id_provider);
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn raw_executors(&self) -> &ProbeRegistry {
        &self.raw
    }

    /// Wrap every raw probe as Resilient(CacheAware(raw)).
    ///
    /// Fallback alternatives resolve to the cache-aware wrappers.
    pub fn build_registry(&self, policy: &CachePolicy) -> ProbeRegistry {
        let mut cached = ProbeRegistry::new();
        for (kind, raw) in self.raw.iter() {
            let executor: Arc<dyn ProbeExecutor> = if self.cache_enabled {
                Arc::new(CachedProbe::new(
                    kind.clone(),
                    Arc::clone(raw),
                    Arc::clone(&self.cache),
                    policy.clone(),
                ))
            } else {
                Arc::clone(raw)
            };
            cached.register(kind.clone(), executor);
        }

        let fallbacks = Arc::new(cached);
        let mut resilient = ProbeRegistry::new();
        for (kind, executor) in fallbacks.iter() {
            resilient.register(
                kind.clone(),
                Arc::new(ResilientProbe::new(
                    kind.clone(),
                    Arc::clone(executor),
                    Arc::clone(&fallbacks),
                    Arc::clone(&self.resilience),
                )),
            );
        }
        resilient
    }

    /// Run a batch through the composed executors
    pub async fn execute_parallel(
        &self,
        tasks: Vec<ScanTask>,
        policy: &CachePolicy,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> HashMap<String, ScanResult> {
        let registry = self.build_registry(policy);
        self.scanner
            .execute_parallel(tasks, &registry, on_progress)
            .await
    }

    /// Run dependency groups through the composed executors
    pub async fn execute_groups(
        &self,
        groups: Vec<Vec<ScanTask>>,
        policy: &CachePolicy,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> HashMap<String, ScanResult> {
        let registry = self.build_registry(policy);
        self.scanner
            .execute_groups(groups, &registry, on_progress)
            .await
    }

    pub async fn execute_with_cache(
        &self,
        probe_kind: &str,
        target: &str,
        params: &ProbeParams,
        raw: &dyn ProbeExecutor,
        policy: &CachePolicy,
        cancel: &CancelToken,
    ) -> ProbeOutcome {
        cache_aware::execute_with_cache(&self.cache, probe_kind, target, params, raw, policy, cancel)
            .await
    }

    pub async fn execute_with_resilience(
        &self,
        probe_kind: &str,
        target: &str,
        params: &ProbeParams,
        wrapped: &dyn ProbeExecutor,
        all_executors: &ProbeRegistry,
        cancel: &CancelToken,
    ) -> ProbeOutcome {
        self.resilience
            .execute_with_resilience(probe_kind, target, params, wrapped, all_executors, cancel)
            .await
    }
}
