use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owned by a timer handle. Dropping it tells the timer task to exit at its next wake up.
pub(super) struct Stopper {
    stopped: Arc<AtomicBool>,
}

/// Owned by the timer task.
pub(super) struct StopCheck {
    stopped: Arc<AtomicBool>,
}

pub(super) fn new() -> (Stopper, StopCheck) {
    let stopped = Arc::new(AtomicBool::new(false));

    (
        Stopper {
            stopped: stopped.clone(),
        },
        StopCheck { stopped },
    )
}

impl Drop for Stopper {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl StopCheck {
    pub(super) fn should_stop(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
