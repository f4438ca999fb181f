//! Bounded retry with delay and cancellation.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of a single attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// The operation succeeded.
    Ready(T),
    /// Transient condition; try again after the delay.
    Retry(E),
    /// Permanent condition; stop immediately.
    Abandon(E),
}

/// Why a retry loop stopped without success.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt asked for a retry. Carries the last reason.
    Exhausted { attempts: u32, last: E },
    /// An attempt asked to stop.
    Abandoned(E),
    /// Shutdown was signalled while waiting between attempts.
    Cancelled,
}

/// Retry policy: at most `max_attempts` tries, `delay` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Run `op` until it returns [`Attempt::Ready`] or [`Attempt::Abandon`], the
/// attempts run out, or `cancel` fires during a delay.
///
/// `op` receives the 1-based attempt number. No delay follows the final attempt.
pub async fn retry_with_delay<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Attempt::Ready(value) => return Ok(value),
            Attempt::Abandon(reason) => return Err(RetryError::Abandoned(reason)),
            Attempt::Retry(reason) => {
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: reason,
                    });
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(policy.delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_attempt() {
        let cancel = CancellationToken::new();
        let result: Result<u32, RetryError<()>> =
            retry_with_delay(policy(), &cancel, |_| async { Attempt::Ready(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_retries() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let result: Result<u32, RetryError<&str>> = retry_with_delay(policy(), &cancel, |n| async move {
            if n < 3 {
                Attempt::Retry("locked")
            } else {
                Attempt::Ready(n)
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let mut calls = 0;
        let result: Result<(), RetryError<&str>> = retry_with_delay(policy(), &cancel, |_| {
            calls += 1;
            async { Attempt::Retry("locked") }
        })
        .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 5,
                last: "locked"
            })
        );
        assert_eq!(calls, 5);
        // Four delays between five attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_stops_immediately() {
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let result: Result<(), RetryError<&str>> = retry_with_delay(policy(), &cancel, |_| {
            calls += 1;
            async { Attempt::Abandon("missing") }
        })
        .await;

        assert_eq!(result, Err(RetryError::Abandoned("missing")));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_delay() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result: Result<(), RetryError<&str>> =
            retry_with_delay(policy(), &cancel, |_| async { Attempt::Retry("locked") }).await;

        assert_eq!(result, Err(RetryError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_policy_requires_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
