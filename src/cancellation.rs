//! Cooperative cancellation for acquisition runs.
//!
//! A run is never killed from outside. The caller raises a [`StopFlag`], and the
//! worker polls it between voltage steps and tracking ticks. When the worker
//! sees it, it unwinds through the normal error path with
//! [`DaqError::Cancelled`], so teardown (instrument off, peripherals released)
//! always runs.

use crate::error::{AppResult, DaqError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;

/// A shared flag for requesting a stop across tasks.
///
/// Lock-free for the hot path (`is_triggered` / `check`); the optional reason
/// sits behind a lock because it is only read for logging. Long waits can
/// race [`StopFlag::cancelled`] instead of polling.
#[derive(Clone, Debug)]
pub struct StopFlag {
    flag: Arc<AtomicBool>,
    reason: Arc<RwLock<Option<String>>>,
    notify: Arc<Notify>,
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl StopFlag {
    /// Create a new, untriggered flag.
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(RwLock::new(None)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Request a stop. Returns `false` if a stop was already requested.
    pub fn trigger(&self, reason: impl Into<String>) -> bool {
        let first = !self.flag.swap(true, Ordering::SeqCst);
        if first {
            if let Ok(mut r) = self.reason.write() {
                *r = Some(reason.into());
            }
            self.notify.notify_waiters();
        }
        first
    }

    /// Check if a stop was requested.
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once a stop was requested.
    pub fn check(&self) -> AppResult<()> {
        if self.is_triggered() {
            Err(DaqError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once a stop was requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }

    /// Get the reason given with the stop request.
    pub fn reason(&self) -> Option<String> {
        self.reason.read().ok().and_then(|r| r.clone())
    }

    /// Reset the flag.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        if let Ok(mut r) = self.reason.write() {
            *r = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_flag() {
        let flag = StopFlag::new();

        assert!(!flag.is_triggered());
        assert!(flag.check().is_ok());

        assert!(flag.trigger("operator pressed stop"));
        assert!(!flag.trigger("second press"));

        assert!(flag.is_triggered());
        assert!(matches!(flag.check(), Err(DaqError::Cancelled)));
        assert_eq!(flag.reason(), Some("operator pressed stop".to_string()));

        flag.reset();

        assert!(!flag.is_triggered());
        assert_eq!(flag.reason(), None);
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let flag = StopFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.cancelled().await })
        };
        tokio::task::yield_now().await;
        flag.trigger("stop");
        waiter.await.unwrap();

        // Already triggered: resolves immediately.
        flag.cancelled().await;
    }

    #[test]
    fn clones_share_state() {
        let flag = StopFlag::new();
        let worker_side = flag.clone();
        flag.trigger("stop");
        assert!(worker_side.is_triggered());
    }
}
