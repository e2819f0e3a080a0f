//! Cooperative cancellation for the streaming decode loop.
//!
//! The gate is polled once before each decoded line. When it reports a stop,
//! the loop ends without flushing the classifier and without a `done` event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// A stop-requested predicate.
pub trait CancellationGate {
    fn stop_requested(&self) -> bool;
}

impl CancellationGate for CancellationToken {
    fn stop_requested(&self) -> bool {
        self.is_cancelled()
    }
}

impl CancellationGate for Arc<AtomicBool> {
    fn stop_requested(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// Adapts a closure into a gate.
pub struct StopWhen<F>(pub F);

impl<F> CancellationGate for StopWhen<F>
where
    F: Fn() -> bool,
{
    fn stop_requested(&self) -> bool {
        (self.0)()
    }
}

/// A gate that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancellationGate for NeverCancel {
    fn stop_requested(&self) -> bool {
        false
    }
}
