use std::future::Future;
use std::time::Duration;

/// Bounded fixed-delay retry. The pipeline deliberately avoids exponential
/// backoff and open-ended loops: a webhook request must not block on a
/// flaky downstream for long.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// One retry after a fixed delay, the policy used for the custom-field
    /// write verification and callback note creation.
    pub fn single_retry(delay: Duration) -> Self {
        Self { max_attempts: 2, delay }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_retry(Duration::from_secs(5))
    }
}

/// Runs `op` up to `policy.max_attempts` times, sleeping `policy.delay`
/// between attempts, and returns the last error when all attempts fail.
pub async fn run_with_retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                last_error = Some(error);
                if attempt < attempts && !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    Err(last_error.expect("at least one attempt runs"))
}
