//! Token bucket limiting outbound request throughput.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{RatesError, RatesResult};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every request of one client.
///
/// Starts full. One token is added per `refill_interval` up to `capacity`.
/// Waiters sleep until their token is due; nothing spins.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_interval: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        Self {
            capacity,
            refill_interval,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Whole tokens currently available.
    pub fn available(&self) -> u32 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens.floor() as u32
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            match self.try_take() {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `deadline`.
    pub async fn acquire_within(&self, deadline: Duration) -> RatesResult<()> {
        tokio::time::timeout(deadline, self.acquire())
            .await
            .map_err(|_| {
                RatesError::RateLimitAbort(format!("no rate limit token within {:?}", deadline))
            })
    }

    /// Take a token, or return how long until one is due.
    fn try_take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }

        let missing = 1.0 - state.tokens;
        Err(self.refill_interval.mul_f64(missing))
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        let earned = elapsed.as_secs_f64() / self.refill_interval.as_secs_f64();

        state.tokens = (state.tokens + earned).min(f64::from(self.capacity));
        state.last_refill = now;
    }
}
