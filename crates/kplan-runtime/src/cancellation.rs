// SPDX-License-Identifier: Apache-2.0
//! Cooperative cancellation for long-running workflow tasks.
//!
//! The file-readiness poll after a submission can run for a minute. The host
//! holds a [`CancellationSource`] and hands the matching
//! [`CancellationToken`] to the poll; cancelling wakes any pending
//! [`wait_timeout`](CancellationToken::wait_timeout) immediately instead of
//! letting it sleep out the interval.
//!
//! # Example
//!
//! ```
//! use kplan_runtime::cancellation::CancellationSource;
//! use std::time::Duration;
//!
//! let source = CancellationSource::new();
//! let token = source.token();
//!
//! let poll = std::thread::spawn(move || {
//!     while !token.wait_timeout(Duration::from_millis(10)) {
//!         // probe the file...
//!     }
//! });
//!
//! source.cancel();
//! poll.join().unwrap();
//! ```

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use web_time::Duration;

/// Observer side of a cancellation signal. Cheap to clone and `Send`.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Shared>,
}

/// Control side of a cancellation signal.
///
/// Dropping the source does not cancel; call [`cancel`](Self::cancel).
pub struct CancellationSource {
    inner: Arc<Shared>,
}

struct Shared {
    cancelled: AtomicBool,
    wake: (Mutex<()>, Condvar),
}

impl CancellationSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                wake: (Mutex::new(()), Condvar::new()),
            }),
        }
    }

    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Request cancellation and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            tracing::debug!("cancellation requested");
        }
        let (lock, cvar) = &self.inner.wake;
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        cvar.notify_all();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSource")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationToken {
    /// A token whose source is already gone; it can never be cancelled.
    #[must_use]
    pub fn never() -> Self {
        CancellationSource::new().token()
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Sleep for `duration` or until cancelled, whichever comes first.
    ///
    /// Returns `true` if cancelled, `false` if the full duration elapsed.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let (lock, cvar) = &self.inner.wake;
        let mut guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let start = web_time::Instant::now();
        let mut remaining = duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let (next, result) = cvar
                .wait_timeout(guard, remaining)
                .unwrap_or_else(|e| e.into_inner());
            guard = next;
            if self.is_cancelled() {
                return true;
            }
            if result.timed_out() {
                return false;
            }
            // Spurious wakeup: sleep out the rest.
            let elapsed = start.elapsed();
            if elapsed >= duration {
                return false;
            }
            remaining = duration - elapsed;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn cancel_reaches_every_token() {
        let source = CancellationSource::new();
        let a = source.token();
        let b = a.clone();
        assert!(!a.is_cancelled());
        source.cancel();
        source.cancel();
        assert!(a.is_cancelled() && b.is_cancelled() && source.is_cancelled());
    }

    #[test]
    fn dropping_source_leaves_token_live() {
        let source = CancellationSource::new();
        let token = source.token();
        drop(source);
        assert!(!token.is_cancelled());
        assert!(!token.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn never_token_times_out() {
        assert!(!CancellationToken::never().wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn wait_returns_immediately_when_already_cancelled() {
        let source = CancellationSource::new();
        source.cancel();
        let start = web_time::Instant::now();
        assert!(source.token().wait_timeout(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn cancel_wakes_a_sleeping_waiter() {
        let source = CancellationSource::new();
        let token = source.token();
        let waiter = thread::spawn(move || {
            let start = web_time::Instant::now();
            (token.wait_timeout(Duration::from_secs(30)), start.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        source.cancel();
        let (cancelled, elapsed) = waiter.join().expect("waiter thread");
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(5));
    }
}
