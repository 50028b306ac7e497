//! Rate-limited model calls with a single backoff retry.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};

use backoff::ExponentialBackoffBuilder;
use tracing::warn;

use super::context::PipelineContext;
use crate::errors::{PodknowError, Result};

/// Attempts per model call: the first try plus one retry.
pub const MAX_ATTEMPTS: u32 = 2;

/// Run `op` behind the shared rate limiter, retrying once on transient
/// failure after the context's backoff delay.
pub async fn call_with_retry<T, F, Fut>(ctx: &PipelineContext, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = AtomicU32::new(0);
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(ctx.retry_backoff)
        .with_randomization_factor(0.0)
        .with_max_elapsed_time(None)
        .build();

    backoff::future::retry(policy, || {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let call = op();
        let limiter = ctx.rate_limiter.clone();
        async move {
            limiter.acquire().await;
            call.await.map_err(|e| classify(e, attempt, what))
        }
    })
    .await
}

fn classify(err: PodknowError, attempt: u32, what: &str) -> backoff::Error<PodknowError> {
    if err.is_transient() && attempt < MAX_ATTEMPTS {
        warn!(call = what, attempt, error = %err, "model call failed, retrying");
        backoff::Error::transient(err)
    } else {
        backoff::Error::permanent(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::pipeline::context::{RateLimiter, StructureCache};
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> PipelineContext {
        PipelineContext::new(
            StructureCache::new(10, Duration::from_secs(60)),
            Arc::new(RateLimiter::unlimited()),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn succeeds_after_one_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(&ctx(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ProviderError::RateLimit.into())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_second_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = call_with_retry(&ctx(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Transport("reset".into()).into()) }
        })
        .await;
        assert!(matches!(
            result,
            Err(PodknowError::Provider(ProviderError::Transport(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = call_with_retry(&ctx(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Authentication.into()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
