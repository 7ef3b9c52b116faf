//! Retry policy: decides between requeue and drop.

/// Retry ceiling for failed deliveries.
///
/// A failed artifact is requeued while `retry_count + 1 < max_retries`.
/// The failure that would reach the ceiling drops it instead, so an artifact
/// is attempted at most `max_retries` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

/// What to do with an artifact whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Move to the tail with this retry count.
    Requeue { retry_count: u32 },

    /// Remove permanently after this many attempts.
    Drop { attempts: u32 },
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Decide the fate of an artifact that failed with `retry_count` prior
    /// failures.
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        let attempts = retry_count.saturating_add(1);
        if attempts < self.max_retries {
            RetryDecision::Requeue {
                retry_count: attempts,
            }
        } else {
            RetryDecision::Drop { attempts }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES)
    }
}
