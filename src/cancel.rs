//! Cooperative cancellation shared between the driver and the pipeline stages.
//!
//! The stages poll [`CancellationToken::is_cancelled`] at their safe points and
//! use [`CancellationToken::sleep`] for rate-limit and backoff waits, so a stop
//! request wakes a pending wait instead of letting it run to completion.
//! In-flight network calls are never interrupted.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cloneable handle to a shared cancellation flag.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: Mutex<bool>,
    wakeup: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation and wakes every pending [`sleep`](Self::sleep).
    pub fn cancel(&self) {
        if let Ok(mut cancelled) = self.inner.cancelled.lock() {
            *cancelled = true;
        }
        self.inner.wakeup.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.lock().map(|c| *c).unwrap_or(true)
    }

    /// Blocks for up to `duration`, returning early when cancelled.
    ///
    /// Returns `true` if the token was cancelled before or during the wait.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let Ok(mut cancelled) = self.inner.cancelled.lock() else {
            return true;
        };
        while !*cancelled {
            let result = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.inner
                        .wakeup
                        .wait_timeout(cancelled, deadline - now)
                        .map(|(guard, _)| guard)
                        .map_err(|_| ())
                }
                // Too far out to represent: wait until cancelled.
                None => self.inner.wakeup.wait(cancelled).map_err(|_| ()),
            };
            cancelled = match result {
                Ok(guard) => guard,
                Err(_) => return true,
            };
        }
        true
    }
}
