//! Task priority and the boxed-closure task type (spec §4.11).

use std::panic::AssertUnwindSafe;

/// Scheduling priority. Ordered `Low < Normal < High < Critical`; the
/// dequeue strategy prefers higher-priority tasks but does not guarantee
/// strict ordering ahead of earlier-submitted lower-priority tasks (spec
/// §4.11 "Ordering").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

pub(crate) type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

/// Run `f`, converting a panic into a readable message instead of
/// unwinding across the worker thread (spec §4.11 "propagates its
/// panic/error").
pub(crate) fn catch_unwind_task<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "worker task panicked".to_string()
        }
    })
}
