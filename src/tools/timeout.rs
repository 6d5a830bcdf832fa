//! Execution Timeout Management
//!
//! Wall-clock budget for one spawned process.

use crate::policy::SecurityPolicy;
use std::future::Future;
use std::time::Duration;
use tokio::time;

/// Execution timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimeout {
    duration: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::from_secs(crate::policy::DEFAULT_TIMEOUT_SECS)
    }
}

/// Marker returned when the budget runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed;

impl ExecutionTimeout {
    /// Create a new execution timeout
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use execbox::tools::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(30));
    /// assert_eq!(timeout.whole_seconds(), 30);
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Create a timeout from seconds
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Budget configured by a policy
    pub fn for_policy(policy: &SecurityPolicy) -> Self {
        Self::new(policy.timeout())
    }

    /// Get the timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Seconds reported in timeout messages
    pub fn whole_seconds(&self) -> u64 {
        self.duration.as_secs()
    }

    /// Run a future under this budget
    ///
    /// The future is dropped if the budget expires first.
    pub async fn run<F, T>(&self, future: F) -> Result<T, Elapsed>
    where
        F: Future<Output = T>,
    {
        time::timeout(self.duration, future).await.map_err(|_| Elapsed)
    }
}
