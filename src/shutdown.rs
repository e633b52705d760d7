use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Process-wide cancellation signal shared by every activity.
///
/// Waiting on the signal doubles as an interruptible sleep, so periodic loops wake
/// immediately when shutdown is raised instead of finishing their interval.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

#[derive(Default)]
struct ShutdownInner {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let mut raised = match self.inner.raised.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *raised = true;
        self.inner.cond.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        match self.inner.raised.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sleep for `timeout` or until shutdown is raised.
    ///
    /// Returns true if shutdown was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        // Too far out to represent: wait for the signal alone.
        let deadline = Instant::now().checked_add(timeout);
        let mut raised = match self.inner.raised.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*raised {
            raised = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    match self.inner.cond.wait_timeout(raised, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                None => match self.inner.cond.wait(raised) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                },
            };
        }
        true
    }
}
