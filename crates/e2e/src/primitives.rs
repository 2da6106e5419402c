//! Timeout and retry wrappers usable by any command

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// Largest backoff exponent; keeps `base * 2^attempt` from overflowing
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Race `operation` against a timer.
///
/// When the timer wins the operation is dropped and `E2eError::Timeout` is
/// returned. Dropping only stops waiting: work already handed to an external
/// process (a browser call in flight) may still complete there.
pub async fn with_timeout<T, F>(operation: F, timeout_ms: u64, message: &str) -> E2eResult<T>
where
    F: Future<Output = E2eResult<T>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), operation).await {
        Ok(result) => result,
        Err(_) => Err(E2eError::Timeout {
            message: message.to_string(),
            timeout_ms,
        }),
    }
}

/// Call `operation` until it succeeds, at most `max_retries + 1` times.
///
/// Only retryable errors (see [`E2eError::is_retryable`]) trigger another
/// attempt; the delay before attempt `n + 1` is `base_delay_ms * 2^n`. The
/// last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(
    mut operation: F,
    max_retries: u32,
    base_delay_ms: u64,
) -> E2eResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                let delay = backoff_delay(base_delay_ms, attempt);
                debug!(
                    "Attempt {} of {} failed ({}), retrying in {} ms",
                    attempt + 1,
                    max_retries + 1,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Delay before the retry following attempt `attempt` (zero-based)
pub fn backoff_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(MAX_BACKOFF_SHIFT);
    Duration::from_millis(base_delay_ms.saturating_mul(factor))
}
