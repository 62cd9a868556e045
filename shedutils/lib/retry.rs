//! `shedutils::retry` provides a bounded retry policy for flaky operations.

use std::{future::Future, time::Duration};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default number of attempts made by a [`Retrier`].
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 10;

/// The default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs an operation until it succeeds or the attempt ceiling is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retrier {
    max_attempts: u32,
    delay: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Retrier {
    /// Creates a retrier. A ceiling of zero is treated as one attempt.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// The maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `operation`, returning the first success or the last error.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => return Err(err),
                Err(err) => {
                    tracing::debug!(attempt, of = self.max_attempts, error = %err, "retrying");
                    attempt += 1;
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for Retrier {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_retrier_stops_at_first_success() {
        let calls = AtomicU32::new(0);
        let retrier = Retrier::new(5, Duration::ZERO);

        let result: Result<u32, String> = retrier
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("attempt {n}"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test_log::test(tokio::test)]
    async fn test_retrier_returns_last_error() {
        let calls = AtomicU32::new(0);
        let retrier = Retrier::new(4, Duration::ZERO);

        let result: Result<(), String> = retrier
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("attempt {n}"))
            })
            .await;

        assert_eq!(result, Err("attempt 4".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_retrier_zero_attempts_means_one() {
        assert_eq!(Retrier::new(0, Duration::ZERO).max_attempts(), 1);
    }
}
