//! Resources shared by every episode worker.
//!
//! The structure cache and the rate limiter are owned here and handed to
//! workers explicitly; nothing in the pipeline reaches for process-global
//! state.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::{PodknowError, Result};
use crate::transcript::ConversationStructure;
use crate::types::PipelineConfig;

// ── Token bucket ──────────────────────────────────────────────────────────────

/// Token-bucket throttle for model-collaborator calls.
///
/// Admits calls at `refill_per_second` on average with bursts of up to
/// `capacity`. Callers wait (asynchronously) until a token is available.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_second: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    /// Start with a full bucket.
    ///
    /// Returns [`PodknowError::Config`] unless `refill_per_second` is finite
    /// and positive.
    pub fn new(capacity: u32, refill_per_second: f64) -> Result<Self> {
        if !refill_per_second.is_finite() || refill_per_second <= 0.0 {
            return Err(PodknowError::Config(format!(
                "rate limiter refill rate must be finite and positive, got {refill_per_second}"
            )));
        }
        Ok(Self::with_bucket(f64::from(capacity.max(1)), refill_per_second))
    }

    /// A limiter that never makes callers wait.
    pub fn unlimited() -> Self {
        Self::with_bucket(f64::from(u32::MAX), f64::MAX)
    }

    fn with_bucket(capacity: f64, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Wait for and consume one token.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
                bucket.refilled_at = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                // Tiny rates overflow `Duration`; tokio clamps `MAX` to a far deadline.
                Duration::try_from_secs_f64((1.0 - bucket.tokens) / self.refill_per_second)
                    .unwrap_or(Duration::MAX)
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limiter throttling");
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available, after refill.
    pub async fn available(&self) -> f64 {
        let bucket = self.bucket.lock().await;
        let elapsed = Instant::now().duration_since(bucket.refilled_at).as_secs_f64();
        (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity)
    }
}

// ── Structure cache ───────────────────────────────────────────────────────────

/// TTL cache of conversation structures keyed by segment-text content hash.
///
/// Concurrent misses on one key may both compute; the last insert wins.
#[derive(Clone)]
pub struct StructureCache {
    inner: Cache<String, Arc<ConversationStructure>>,
}

impl StructureCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, content_hash: &str) -> Option<Arc<ConversationStructure>> {
        self.inner.get(content_hash).await
    }

    pub async fn insert(&self, structure: Arc<ConversationStructure>) {
        self.inner
            .insert(structure.content_hash.clone(), structure)
            .await;
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Explicit bundle of cross-episode resources passed to every worker.
#[derive(Clone)]
pub struct PipelineContext {
    pub cache: StructureCache,
    pub rate_limiter: Arc<RateLimiter>,
    /// Delay before the single retry of a failed model call.
    pub retry_backoff: Duration,
}

impl PipelineContext {
    pub fn new(cache: StructureCache, rate_limiter: Arc<RateLimiter>, retry_backoff: Duration) -> Self {
        Self {
            cache,
            rate_limiter,
            retry_backoff,
        }
    }

    /// Build fresh resources from configuration, rejecting out-of-range
    /// settings with [`PodknowError::Config`].
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.ensure_valid()?;
        Ok(Self::new(
            StructureCache::new(config.cache_capacity, config.cache_ttl()),
            Arc::new(RateLimiter::new(
                config.rate_limit_burst,
                config.rate_limit_per_second,
            )?),
            config.retry_backoff(),
        ))
    }
}
