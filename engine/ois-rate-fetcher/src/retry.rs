use crate::config::RetryConfig;
use crate::error::OisError;
use std::future::Future;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError {
    /// Every attempt failed transiently
    Exhausted { attempts: u32, last: OisError },

    /// An attempt failed with a non-transient error
    Aborted { attempts: u32, error: OisError },
}

/// Run an operation with per-attempt timeouts and exponential backoff.
///
/// Only transient errors and timeouts are retried; anything else stops immediately.
pub async fn run_with_retry<F, Fut, T>(
    operation: &str,
    retry_config: &RetryConfig,
    mut f: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::error::Result<T>>,
{
    let call_timeout = retry_config.call_timeout();
    let mut last = None;

    for attempt in 1..=retry_config.max_attempts {
        let error = match timeout(call_timeout, f()).await {
            Ok(Ok(result)) => return Ok(result),
            Ok(Err(e)) if e.is_transient() => e,
            Ok(Err(e)) => return Err(RetryError::Aborted { attempts: attempt, error: e }),
            Err(_) => {
                OisError::transient(format!("{} timed out after {:?}", operation, call_timeout))
            }
        };

        if attempt < retry_config.max_attempts {
            let delay = retry_config.delay_after_attempt(attempt);
            warn!(
                "{} attempt {}/{} failed: {}, retrying in {:?}",
                operation, attempt, retry_config.max_attempts, error, delay
            );
            sleep(delay).await;
        } else {
            warn!(
                "{} attempt {}/{} failed: {}, giving up",
                operation, attempt, retry_config.max_attempts, error
            );
        }
        last = Some(error);
    }

    Err(RetryError::Exhausted {
        attempts: retry_config.max_attempts,
        last: last.unwrap_or_else(|| OisError::config("retry policy allows zero attempts")),
    })
}
