// Scheduler constants (no magic values)
use std::time::Duration;

/// Default worker pool width
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// How long a timed-out probe gets to honor cancellation before it is aborted (2s)
pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(2);
