// Application Layer - Use Cases and Business Logic

pub mod cache;
pub mod cache_aware;
pub mod orchestrator;
pub mod resilience;
pub mod scheduler;

// Re-exports
pub use cache::{CacheConfig, CacheStats, CacheSweeper, ResultCache, TtlPolicy};
pub use cache_aware::{execute_with_cache, CachePolicy, CachedProbe};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use resilience::{
    ResilienceConfig, ResilientExecutor, ResilientProbe, RetryPolicy, SubstitutionTable,
};
pub use scheduler::{ParallelScanner, ProgressCallback, ScannerConfig};
