//! Timeout utilities for operations that might hang.
//!
//! Module `stop()` calls are user code running on the blocking pool; the
//! coordinator bounds how long it waits for them with these helpers.

use std::time::Duration;
use tokio::time::timeout;

/// Default bound on module `stop()` calls during shutdown
pub const DEFAULT_MODULE_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Execute operation with custom timeout
pub async fn with_custom_timeout<F, T>(
    operation: F,
    duration: Duration,
) -> Result<T, tokio::time::error::Elapsed>
where
    F: std::future::Future<Output = T>,
{
    timeout(duration, operation).await
}
