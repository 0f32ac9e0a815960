//! Outbound request rate limiting
//!
//! One limiter is shared by every delivery, so the combined call rate of
//! all workers and broadcasts stays under the platform limit.

// Token counts are tracked as f64 for fractional refill
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Permit source for outbound calls
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until one call may proceed
    async fn acquire(&self);

    /// Take a permit if one is available right now
    fn try_acquire(&self) -> bool;

    /// Permits currently available (approximate)
    fn available(&self) -> usize;
}

/// Token bucket: refills at `rate` per second up to `burst`
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: usize,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    ///
    /// `rate` is clamped to at least one permit per second and `burst` to at
    /// least one permit.
    #[must_use]
    pub fn new(rate_per_second: u32, burst: u32) -> Self {
        let burst = burst.max(1) as usize;
        Self {
            rate: f64::from(rate_per_second.max(1)),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst as f64);
        state.last_refill = now;
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }

    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn available(&self) -> usize {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens as usize
    }
}
