//! Bounded exponential-backoff retry helper for object-store I/O: each call
//! gets up to 3 backed-off attempts within a 10s budget, never an unbounded
//! retry loop.
//!
//! Only [`AutoscalerError::is_retryable`] errors (`Timeout`, `PatchConflict`)
//! are retried; everything else — `NotFound` in particular — returns to the
//! caller on the first attempt, since retrying a resource that does not
//! exist cannot change the outcome.

use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

use crate::error::{AutoscalerError, Result};

const BASE_DELAY: Duration = Duration::from_millis(100);
const MAX_ATTEMPTS: usize = 3;

/// Retries `operation` up to [`MAX_ATTEMPTS`] times with jittered
/// exponential backoff, but only while the error it returns is
/// [`AutoscalerError::is_retryable`]. `label` is used only for the warning
/// logged on a retried failure.
pub async fn with_backoff<F, Fut, T>(label: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let strategy = ExponentialBackoff::from_millis(BASE_DELAY.as_millis() as u64)
        .map(jitter)
        .take(MAX_ATTEMPTS - 1);

    let mut attempt = 0u32;
    RetryIf::spawn(
        strategy,
        || {
            attempt += 1;
            operation()
        },
        |e: &AutoscalerError| {
            let retry = e.is_retryable();
            if retry {
                warn!(operation = %label, attempt, error = %e, "object-store call failed; retrying with backoff");
            }
            retry
        },
    )
    .await
}
