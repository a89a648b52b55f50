//! Fixed-delay bounded retry

use crate::config::RetryPolicy;
use std::fmt::Display;
use std::future::Future;

/// Run `op` until it succeeds or `policy.max_attempts` is reached.
///
/// `op` receives the 1-based attempt number. The delay is applied between
/// attempts only. On exhaustion the last error is returned.
pub async fn retry_bounded<T, E, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "{} attempt failed",
                    what
                );
                if attempt >= policy.max_attempts {
                    return Err(e);
                }
            }
        }
        attempt += 1;
        tokio::time::sleep(policy.delay).await;
    }
}
