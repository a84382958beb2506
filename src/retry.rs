//! Retry policy and cancellation for operations callers choose to re-issue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::debug;

use crate::error::{ProtocolError, Result};

/// Shared flag telling long-running work to give up.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub backoff: Duration,
    /// Each subsequent backoff is multiplied by this factor.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, runs out
    /// of attempts or `cancel` fires. `op` receives the zero-based attempt.
    pub fn run<T>(
        &self,
        cancel: &CancelToken,
        mut op: impl FnMut(u32) -> Result<T>,
    ) -> Result<T> {
        let mut delay = self.backoff;
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ProtocolError::Cancelled);
            }
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    debug!("Attempt {} failed ({}), retrying in {:?}", attempt + 1, e, delay);
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(self.multiplier.max(1));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
