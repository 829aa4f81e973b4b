//! Retry and timeout policies for connection and transfer attempts.

use std::time::Duration;

/// Timing policy for one connect-or-transfer loop.
///
/// Always passed explicitly to [`Connection::open`](crate::Connection::open)
/// and [`DeviceManager::upload`](crate::DeviceManager::upload); there is no
/// process-wide configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts before giving up.
    pub max_attempts: u32,
    /// Base delay for inter-attempt backoff.
    pub base_delay: Duration,
    /// Discovery scan duration on the first attempt.
    pub scan_timeout: Duration,
    /// Link establishment timeout on the first attempt.
    pub link_timeout: Duration,
    /// Upper bound for the attempt-scaled link timeout.
    pub link_timeout_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            scan_timeout: Duration::from_secs(5),
            link_timeout: Duration::from_secs(10),
            link_timeout_cap: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff before the next connection attempt:
    /// `base_delay * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Linear backoff used by the transfer-level retry loop:
    /// `base_delay * (attempt + 1)`. A transfer failure after a good link
    /// is a different failure class than "could not link at all".
    pub fn transfer_backoff(&self, attempt: u32) -> Duration {
        self.base_delay * (attempt + 1)
    }

    /// Scan duration for the given attempt. Lengthens by one second per
    /// retry so a device that was mid-advertisement-interval on the first
    /// pass still gets caught.
    pub fn scan_timeout(&self, attempt: u32) -> Duration {
        self.scan_timeout + Duration::from_secs(u64::from(attempt))
    }

    /// Link timeout for the given attempt, scaled up per retry and capped
    /// at `link_timeout_cap`.
    pub fn link_timeout(&self, attempt: u32) -> Duration {
        let scaled = self.link_timeout + self.link_timeout / 2 * attempt;
        scaled.min(self.link_timeout_cap)
    }
}
