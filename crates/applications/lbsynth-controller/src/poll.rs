//! Bounded polling for eventual-consistency waits
//!
//! Polls a check at a fixed interval until it yields a value or the overall
//! timeout elapses. A timeout surfaces as [`SynthError::RetryAfter`] so the
//! caller can requeue the pass instead of blocking.

use crate::config::PollSettings;
use lbsynth_core::{Result, SynthError};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Fixed-interval poller with an overall timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
    retry_delay: Duration,
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration, retry_delay: Duration) -> Self {
        Self {
            interval,
            timeout,
            retry_delay,
        }
    }

    /// Poller from configured settings
    pub fn from_settings(settings: &PollSettings) -> Self {
        Self::new(
            settings.interval(),
            settings.timeout(),
            settings.requeue_delay(),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll `check` until it returns `Some`.
    ///
    /// Check errors abort the wait immediately. The check always runs at least
    /// once, so a zero timeout still checks the current state.
    pub async fn until<T, F, Fut>(&self, what: &str, mut check: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let start = Instant::now();

        loop {
            if let Some(value) = check().await? {
                debug!(
                    what = %what,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Wait condition met"
                );
                return Ok(value);
            }

            if start.elapsed() + self.interval > self.timeout {
                return Err(SynthError::retry_after(
                    format!("timed out after {:?} waiting for {}", self.timeout, what),
                    self.retry_delay,
                ));
            }

            debug!(what = %what, "Condition not met, waiting...");
            tokio::time::sleep(self.interval).await;
        }
    }
}
