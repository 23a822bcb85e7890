use std::future::Future;
use std::time::Duration;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// Error returned once the operation has failed for good.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Attempts actually made before giving up.
    pub attempts: u32,
    pub last_error: E,
}

/// Retry an async operation with a fixed delay between attempts.
///
/// - `config`: attempt budget and pause
/// - `classifier`: inspects an error and returns `Retry` or `Abort`
/// - `operation`: the async closure to retry, given the 1-based attempt number
///
/// Returns the first `Ok` result, or the last error once the budget is spent
/// or the classifier returns `Abort`.
pub async fn retry_with_delay<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if classifier(&e) == RetryAction::Abort || attempt >= total_attempts {
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                tracing::warn!(
                    "Attempt {}/{} failed, retrying in {}ms: {}",
                    attempt,
                    total_attempts,
                    config.delay.as_millis(),
                    e
                );
                tokio::time::sleep(config.delay).await;
                attempt += 1;
            }
        }
    }
}
