//! Probe Timeout Management
//!
//! Bounded waits for short-lived helper processes (version probes).
//! Tool runs themselves are never bounded.

use std::time::Duration;
use tokio::time;

/// Timeout for a single helper-process probe
#[derive(Debug, Clone, Copy)]
pub struct ProbeTimeout {
    /// The timeout duration
    duration: Duration,
}

impl Default for ProbeTimeout {
    fn default() -> Self {
        Self::from_millis(5000)
    }
}

impl ProbeTimeout {
    /// Create a new probe timeout
    ///
    /// # Arguments
    ///
    /// * `duration` - The timeout duration
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use nser::tools::ProbeTimeout;
    ///
    /// let timeout = ProbeTimeout::new(Duration::from_secs(2));
    /// assert_eq!(timeout.duration(), Duration::from_secs(2));
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Create a timeout from milliseconds
    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Get the timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run a future, giving up after the timeout
    ///
    /// # Returns
    ///
    /// `Some(output)` if the future finished in time, `None` if it expired.
    /// The future is dropped on expiry, which kills any `kill_on_drop` child.
    pub async fn run<F, T>(&self, future: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        time::timeout(self.duration, future).await.ok()
    }
}
