// Port Layer - Interfaces for external dependencies

pub mod cache_backend;
pub mod cancel;
pub mod id_provider; // For deterministic testing
pub mod probe_executor;
pub mod time_provider;
pub mod tool_registry;

// Re-exports
pub use cache_backend::{CacheBackend, CacheError};
pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use id_provider::{IdProvider, UuidProvider};
pub use probe_executor::{ExecutionError, FnProbe, ProbeExecutor, ProbeRegistry};
pub use time_provider::{SystemTimeProvider, TimeProvider};
pub use tool_registry::ToolRegistry;
