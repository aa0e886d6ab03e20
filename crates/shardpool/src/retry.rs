//! Retry policy for opening physical connections
//!
//! Delays start at the configured retry delay and grow by a multiplier on
//! each further attempt. The pool's default multiplier of 1.0 keeps every
//! delay identical.

use std::time::Duration;

/// Upper bound on a single retry delay.
const MAX_RETRY_DELAY_MS: u64 = 5 * 60_000;

/// Bounded retry schedule for connection attempts.
///
/// # Example
///
/// ```
/// use shardpool::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, 100).with_multiplier(2.0);
///
/// assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
/// assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
/// assert!(policy.allows_retry(2));
/// assert!(!policy.allows_retry(3));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt
    max_retries: u32,
    /// Delay in milliseconds before the first retry
    initial_ms: u64,
    /// Multiplier for each further retry (at least 1.0)
    multiplier: f64,
}

impl RetryPolicy {
    /// Create a policy allowing `max_retries` retries, `initial_ms` apart.
    pub fn new(max_retries: u32, initial_ms: u64) -> Self {
        Self {
            max_retries,
            initial_ms: initial_ms.max(1),
            multiplier: 1.0,
        }
    }

    /// Set the growth factor between retries.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_nan() { 1.0 } else { multiplier.max(1.0) };
        self
    }

    /// Delay to wait after the given zero-based failed attempt.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_ms as f64) * self.multiplier.powi(attempt as i32);
        let capped_ms = delay_ms.min(MAX_RETRY_DELAY_MS as f64) as u64;
        Duration::from_millis(capped_ms)
    }

    /// Whether another attempt may follow the given failed attempt.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

impl Default for RetryPolicy {
    /// Five retries, seven seconds apart
    fn default() -> Self {
        Self::new(5, 7_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_by_default() {
        let policy = RetryPolicy::new(3, 250);
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(250));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(250));
    }

    #[test]
    fn test_delay_growth_is_capped() {
        let policy = RetryPolicy::new(50, 1_000).with_multiplier(10.0);
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(10_000));
        assert_eq!(
            policy.calculate_delay(20),
            Duration::from_millis(MAX_RETRY_DELAY_MS)
        );
    }

    #[test]
    fn test_multiplier_below_one_is_ignored() {
        let policy = RetryPolicy::new(1, 100).with_multiplier(0.5);
        assert_eq!(policy.multiplier(), 1.0);

        let policy = RetryPolicy::new(1, 100).with_multiplier(f64::NAN);
        assert_eq!(policy.multiplier(), 1.0);
    }

    #[test]
    fn test_zero_retries_never_retry() {
        let policy = RetryPolicy::new(0, 100);
        assert!(!policy.allows_retry(0));
    }
}
