//! Retry with linear backoff.
//!
//! Errors decide for themselves whether another attempt makes sense through
//! [`Retryable`]; everything else is returned on the spot.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Classifies an error as transient (worth another attempt) or fatal.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// How many times to try and how long to wait in between.
///
/// The wait after failed attempt `n` (0-based) is
/// `initial_delay + n * delta_delay`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use telemon_common::retry::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.delay_for(0), Duration::from_secs(1));
/// assert_eq!(policy.delay_for(1), Duration::from_secs(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub delta_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            delta_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation failed with an error that retrying cannot fix.
    #[error("{0}")]
    Fatal(E),

    /// Every attempt failed with a retryable error; `source` is the last one.
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal(e) => e,
            RetryError::Exhausted { source, .. } => source,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay + self.delta_delay.saturating_mul(attempt)
    }

    /// Runs `op` until it succeeds, fails fatally, or runs out of attempts.
    pub async fn retry<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(RetryError::Fatal(e)),
                Err(e) if attempt + 1 >= attempts => {
                    return Err(RetryError::Exhausted {
                        attempts,
                        source: e,
                    })
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Broken,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            delta_delay: Duration::from_millis(50),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_transient_failures() {
        let calls = AtomicU32::new(0);
        let seen = Mutex::new(Vec::new());
        let start = Instant::now();

        let result = policy()
            .retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(start.elapsed());
                async move {
                    if n < 2 {
                        Err(TestError::Transient)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1] - seen[0], Duration::from_millis(100));
        assert_eq!(seen[2] - seen[1], Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Broken) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Fatal(TestError::Broken))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Transient) }
            })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source, TestError::Transient);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
