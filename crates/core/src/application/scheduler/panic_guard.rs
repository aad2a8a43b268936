// Panic isolation for probe workers
use std::any::Any;
use tokio::task::JoinError;
use tracing::error;

/// Human-readable message from a join error (panic payload or cancellation)
pub fn join_error_message(probe_kind: &str, err: JoinError) -> String {
    if err.is_panic() {
        let msg = panic_message(err.into_panic().as_ref());
        error!(probe_kind, panic_msg = %msg, "Probe task panicked");
        format!("Probe panicked: {}", msg)
    } else {
        error!(probe_kind, "Probe task cancelled");
        "Probe task was cancelled".to_string()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
