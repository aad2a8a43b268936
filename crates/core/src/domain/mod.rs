// Domain Layer - Scan tasks, results and the failure taxonomy

pub mod cache_entry;
pub mod error;
pub mod result;
pub mod task;

// Re-exports
pub use cache_entry::CacheEntry;
pub use error::{ErrorCategory, ErrorContext};
pub use result::{Payload, ProbeOutcome, ScanResult};
pub use task::{default_timeout, Priority, ProbeParams, ScanTask};
