use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// The next time a timer task should wake up, shared between the task and its handle. The handle
/// pushes the deadline out; the task takes it, sleeps until then, and fires if nobody set a new
/// one in the meantime.
#[derive(Clone, Default)]
pub(super) struct SharedWakeTime {
    next: Arc<Mutex<Option<Instant>>>,
}

impl SharedWakeTime {
    pub(super) fn set(&self, wake_time: Instant) {
        self.lock().replace(wake_time);
    }

    pub(super) fn take(&self) -> Option<Instant> {
        self.lock().take()
    }

    // Nothing can leave an `Option<Instant>` half written, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Option<Instant>> {
        self.next.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
