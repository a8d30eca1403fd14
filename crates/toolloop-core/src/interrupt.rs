//! Cooperative interrupt signal.
//!
//! An [`Interrupt`] is cheap to clone; every clone observes the same flag.
//! Once triggered it stays triggered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::AgentError;

#[derive(Debug, Default)]
struct Inner {
    triggered: AtomicBool,
    notify: Notify,
}

/// Shared cancellation flag with async wake-up.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter.
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// `Err(AgentError::Interrupted)` once the signal has been raised.
    pub fn check(&self) -> Result<(), AgentError> {
        if self.is_triggered() {
            Err(AgentError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Resolve once the signal is raised.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a trigger in between is not lost.
            let notified = self.inner.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}
