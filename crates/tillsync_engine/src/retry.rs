//! Retry with exponential backoff for transient store failures.

use crate::cancel::CancelToken;
use crate::config::RetryPolicy;
use crate::error::{EngineError, EngineResult};
use std::future::Future;
use tillsync_store::StoreResult;

/// Runs `operation` until it succeeds, fails permanently, or the policy's
/// attempts run out.
///
/// Only transient store errors are retried. Cancellation is checked before
/// every attempt.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    what: &str,
    mut operation: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = policy.delay_for_attempt(attempt);
            tracing::debug!(what, attempt, ?delay, "retrying after transient failure");
            tokio::time::sleep(delay).await;
        }
        cancel.check()?;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                tracing::warn!(what, attempt, error = %e, "transient store failure");
                attempt += 1;
            }
            Err(e) => return Err(EngineError::Store(e)),
        }
    }
}
