//! Timeout utilities.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Run an operation with a timeout.
///
/// The operation is dropped when the budget runs out; the caller receives
/// [`crate::AfuError::Timeout`] carrying the budget that was exceeded.
pub async fn with_timeout<T, F, Fut>(timeout: Duration, operation: F) -> crate::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    match tokio::time::timeout(timeout, operation()).await {
        Ok(value) => Ok(value),
        Err(_) => {
            debug!(?timeout, "Operation exceeded its time budget");
            Err(crate::AfuError::Timeout(timeout))
        }
    }
}
