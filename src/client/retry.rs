use std::thread;
use std::time::Duration;

use crate::core::{Result, StoreError};

/// Error-text fragments identifying the transient failures worth
/// retrying: entity-group contention, a reset connection, and a
/// backend-unavailable status. Everything else propagates on the first
/// attempt, so programming errors are never masked and non-idempotent
/// writes are never blindly repeated.
pub const TRANSIENT_SIGNATURES: [&str; 3] = [
    "too much contention",
    "Connection reset by peer",
    "\"status\": \"UNAVAILABLE\"",
];

/// Whether an error matches the transient allow-list.
pub fn is_transient(err: &StoreError) -> bool {
    let rendered = err.to_string();
    TRANSIENT_SIGNATURES
        .iter()
        .any(|signature| rendered.contains(signature))
}

/// Bounded exponential-backoff retry for remote calls.
///
/// Wraps every lookup, query and commit round trip. Only errors
/// matching [`TRANSIENT_SIGNATURES`] are retried; the final error is
/// propagated unchanged once the attempt budget is spent.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoff {
    pub const DEFAULT_RETRIES: u32 = 6;

    pub fn new(retries: u32) -> Self {
        Self {
            retries: retries.max(1),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Run `operation`, retrying transient failures up to the attempt
    /// budget with a doubling, capped delay between attempts.
    pub fn execute<T, F>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0u32;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.retries || !is_transient(&err) {
                        return Err(err);
                    }
                    log::info!(
                        "ExponentialBackoff: retrying store operation (attempt {attempt}): {err}"
                    );
                    thread::sleep(self.delay_for(attempt));
                }
            }
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_signatures_match_by_substring() {
        assert!(is_transient(&StoreError::Transport(
            "ABORTED: too much contention on these entities".into()
        )));
        assert!(is_transient(&StoreError::Transport(
            "read failed: Connection reset by peer".into()
        )));
        assert!(is_transient(&StoreError::Transport(
            r#"{ "status": "UNAVAILABLE" }"#.into()
        )));
        assert!(!is_transient(&StoreError::Transport("PERMISSION_DENIED".into())));
        assert!(!is_transient(&StoreError::InvalidQuery("bad".into())));
    }

    #[test]
    fn delay_doubles_and_caps() {
        let backoff = ExponentialBackoff::new(6)
            .base_delay(Duration::from_millis(10))
            .max_delay(Duration::from_millis(50));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(20));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(40));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(50));
        assert_eq!(backoff.delay_for(30), Duration::from_millis(50));
    }
}
