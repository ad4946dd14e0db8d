//! Bounded interval polling for values that have no event stream.
//!
//! Aggregate queries (e.g. "every policy constraint has finished its
//! audit") have no single resource to watch, so they are re-evaluated on a
//! fixed interval. The poller gives a deliberately weak guarantee: when the
//! attempts run out it hands back whatever it saw last, and the caller
//! decides whether a not-ready value is acceptable.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::Error;

/// Default number of attempts for aggregate polling
pub const DEFAULT_POLL_ATTEMPTS: u32 = 5;

/// Default interval between aggregate polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Value returned by [`RetryPoller::poll`]
#[derive(Clone, Debug, PartialEq)]
pub struct Polled<T> {
    /// Last value observed
    pub value: T,
    /// Whether `value` satisfied the readiness check
    pub ready: bool,
    /// Number of attempts made
    pub attempts: u32,
}

/// Fixed-interval poller with an attempt budget.
#[derive(Clone, Debug)]
pub struct RetryPoller {
    max_attempts: u32,
    interval: Duration,
}

impl Default for RetryPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL)
    }
}

impl RetryPoller {
    /// Create a poller. At least one attempt is always made.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// Maximum number of attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Interval slept between attempts
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Evaluate `op` until `is_ready` accepts its value or attempts run out.
    ///
    /// Retryable errors count as a not-ready attempt. A non-retryable error
    /// is returned immediately. When attempts are exhausted the last
    /// observed value is returned with `ready = false`; only if no attempt
    /// ever produced a value is the last error returned instead.
    pub async fn poll<T, F, Fut, R>(
        &self,
        operation_name: &str,
        mut op: F,
        is_ready: R,
    ) -> Result<Polled<T>, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
        R: Fn(&T) -> bool,
    {
        let mut last_value: Option<T> = None;
        let mut last_error: Option<Error> = None;

        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) if is_ready(&value) => {
                    debug!(operation = %operation_name, attempt, "Poll condition met");
                    return Ok(Polled {
                        value,
                        ready: true,
                        attempts: attempt,
                    });
                }
                Ok(value) => {
                    debug!(operation = %operation_name, attempt, "Poll value not ready yet");
                    last_value = Some(value);
                }
                Err(e) if e.is_retryable() => {
                    warn!(operation = %operation_name, attempt, error = %e, "Poll attempt failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        match (last_value, last_error) {
            (Some(value), _) => {
                warn!(
                    operation = %operation_name,
                    attempts = self.max_attempts,
                    "Poll budget exhausted, returning last observed value"
                );
                Ok(Polled {
                    value,
                    ready: false,
                    attempts: self.max_attempts,
                })
            }
            (None, Some(e)) => Err(e),
            (None, None) => Err(Error::transport(
                operation_name,
                "poll made no attempts",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting_op(
        ready_on: u32,
        count: Arc<AtomicU32>,
    ) -> impl FnMut() -> std::future::Ready<Result<Vec<u32>, Error>> {
        move || {
            let n = count.fetch_add(1, Ordering::SeqCst) + 1;
            let value = if n >= ready_on { vec![n] } else { Vec::new() };
            std::future::ready(Ok(value))
        }
    }

    /// Story: the audit list becomes non-empty on the third attempt; the
    /// poller returns it and makes no fourth call.
    #[tokio::test(start_paused = true)]
    async fn story_stops_on_first_ready_value() {
        let count = Arc::new(AtomicU32::new(0));
        let poller = RetryPoller::new(5, Duration::from_secs(30));

        let polled = poller
            .poll("audit", counting_op(3, count.clone()), |v| !v.is_empty())
            .await
            .unwrap();

        assert!(polled.ready);
        assert_eq!(polled.value, vec![3]);
        assert_eq!(polled.attempts, 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_value_not_error() {
        let count = Arc::new(AtomicU32::new(0));
        let poller = RetryPoller::new(4, Duration::from_secs(1));

        let polled = poller
            .poll("audit", counting_op(100, count.clone()), |v| !v.is_empty())
            .await
            .unwrap();

        assert!(!polled.ready);
        assert!(polled.value.is_empty());
        assert_eq!(polled.attempts, 4);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_only_between_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let poller = RetryPoller::new(3, Duration::from_secs(10));
        let start = tokio::time::Instant::now();

        poller
            .poll("audit", counting_op(100, count), |v| !v.is_empty())
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_count_as_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let poller = RetryPoller::new(5, Duration::from_millis(10));

        let polled = poller
            .poll(
                "audit",
                move || {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n < 2 {
                            Err(Error::transport("audit", "connection reset"))
                        } else {
                            Ok(n)
                        }
                    }
                },
                |n| *n >= 2,
            )
            .await
            .unwrap();

        assert!(polled.ready);
        assert_eq!(polled.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_polling() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let poller = RetryPoller::new(5, Duration::from_millis(10));

        let result = poller
            .poll(
                "audit",
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    async { Err::<u32, _>(Error::decode("items[0].status", "not an object")) }
                },
                |_| true,
            )
            .await;

        assert!(matches!(result, Err(Error::Decode { .. })));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_errors_returns_last_error() {
        let poller = RetryPoller::new(2, Duration::from_millis(10));
        let result = poller
            .poll(
                "audit",
                || async { Err::<u32, _>(Error::transport("audit", "down")) },
                |_| true,
            )
            .await;
        assert!(matches!(result, Err(Error::Transport { .. })));
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        assert_eq!(RetryPoller::new(0, Duration::ZERO).max_attempts(), 1);
    }
}
