//! Rate Limiting - Token bucket pacing for check dispatch
//!
//! Caps how fast checks start, independently of how many may run at
//! once. The bucket refills continuously at `rate` tokens per second and
//! holds at most `burst` tokens.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Token bucket rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Tokens added per second; `None` when unlimited
    rate: Option<f64>,
    /// Bucket capacity
    burst: f64,
    state: Arc<Mutex<BucketState>>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Limiter allowing `rate` operations per second with a burst of `rate`
    ///
    /// A non-positive or non-finite rate disables limiting.
    pub fn new(rate: f64) -> Self {
        Self::with_burst(rate, rate)
    }

    /// Limiter with an explicit burst capacity (at least one token)
    pub fn with_burst(rate: f64, burst: f64) -> Self {
        if !rate.is_finite() || rate <= 0.0 {
            return Self::unlimited();
        }

        let burst = if burst.is_finite() { burst.max(1.0) } else { 1.0 };
        Self {
            rate: Some(rate),
            burst,
            state: Arc::new(Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Limiter that never waits
    pub fn unlimited() -> Self {
        Self {
            rate: None,
            burst: f64::INFINITY,
            state: Arc::new(Mutex::new(BucketState {
                tokens: f64::INFINITY,
                last_refill: Instant::now(),
            })),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate.is_none()
    }

    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    /// Wait until a token is available and take it
    pub async fn acquire(&self) {
        let Some(rate) = self.rate else {
            return;
        };

        loop {
            let mut state = self.state.lock().await;
            self.refill(&mut state, rate);

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }

            let wait = Duration::from_secs_f64((1.0 - state.tokens) / rate);
            drop(state);
            tokio::time::sleep(wait).await;
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up when `cancel` fires
    pub async fn acquire_cancellable(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RateLimitError::Cancelled),
            _ = self.acquire() => Ok(()),
        }
    }

    /// Tokens currently available (after refill)
    pub async fn available(&self) -> f64 {
        let Some(rate) = self.rate else {
            return f64::INFINITY;
        };
        let mut state = self.state.lock().await;
        self.refill(&mut state, rate);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState, rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(self.burst);
        state.last_refill = now;
    }
}

/// Rate limit error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("cancelled while waiting for a rate limit token")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_rate_is_unlimited() {
        assert!(RateLimiter::new(0.0).is_unlimited());
        assert!(RateLimiter::new(-5.0).is_unlimited());
        assert!(RateLimiter::new(f64::NAN).is_unlimited());
        assert!(!RateLimiter::new(2.0).is_unlimited());
    }

    #[test]
    fn burst_equals_rate() {
        let limiter = RateLimiter::new(25.0);
        assert_eq!(limiter.rate(), Some(25.0));
        assert_eq!(limiter.burst(), 25.0);
    }

    #[test]
    fn fractional_rate_still_allows_one_token() {
        let limiter = RateLimiter::new(0.5);
        assert_eq!(limiter.burst(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_immediate() {
        let limiter = RateLimiter::new(5.0);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));
        assert!(limiter.available().await < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn paces_after_burst() {
        let limiter = RateLimiter::new(10.0);
        let start = Instant::now();
        for _ in 0..30 {
            limiter.acquire().await;
        }
        // 10 from the initial burst, 20 more at 10/s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1990), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2200), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn refills_up_to_burst_only() {
        let limiter = RateLimiter::new(4.0);
        for _ in 0..4 {
            limiter.acquire().await;
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(limiter.available().await, 4.0);
    }

    #[tokio::test]
    async fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..10_000 {
            limiter.acquire().await;
        }
        assert!(limiter.available().await.is_infinite());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_wait() {
        let limiter = RateLimiter::new(1.0);
        limiter.acquire().await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            limiter.acquire_cancellable(&cancel).await,
            Err(RateLimitError::Cancelled)
        );
    }

    #[tokio::test]
    async fn cancellable_acquire_succeeds_with_tokens() {
        let limiter = RateLimiter::new(3.0);
        let cancel = CancellationToken::new();
        assert!(limiter.acquire_cancellable(&cancel).await.is_ok());
    }

    #[test]
    fn rate_limit_error_display() {
        let display = RateLimitError::Cancelled.to_string();
        assert!(display.contains("cancelled"));
    }
}
