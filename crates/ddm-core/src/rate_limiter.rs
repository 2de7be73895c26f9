//! Global byte-rate limiter: token bucket with burst and debt.
//!
//! Guards the bucket arithmetic with a short lock and sleeps outside it
//! (see `downloader::run::run_concurrent`'s channel/queue handoff for the
//! same discipline applied to worker coordination).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    fn new(rate: f64) -> Self {
        Self::with_burst(rate, rate * 2.0)
    }

    fn with_burst(rate: f64, burst: f64) -> Self {
        Bucket {
            rate,
            burst,
            tokens: burst,
            last_update: Instant::now(),
        }
    }

    /// Refill, subtract `n`, and return how long the caller must sleep.
    fn take(&mut self, n: u64) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.tokens -= n as f64;

        if self.tokens < 0.0 {
            let debt = -self.tokens;
            Duration::from_secs_f64(debt / self.rate)
        } else {
            Duration::ZERO
        }
    }

    fn set_rate(&mut self, rate: f64) {
        self.rate = rate;
        self.burst = rate * 2.0;
        self.tokens = self.tokens.min(self.burst);
    }
}

/// Global token-bucket limiter. `consume` blocks the caller (via sleep, not a
/// busy loop) until `n` bytes' worth of tokens are available. Rate `0` or
/// `None` disables limiting entirely — `consume` becomes a no-op.
pub struct RateLimiter {
    bucket: Mutex<Option<Bucket>>,
    enabled: AtomicBool,
}

impl RateLimiter {
    pub fn new(rate_bytes_per_sec: Option<u64>) -> Self {
        let bucket = rate_bytes_per_sec
            .filter(|&r| r > 0)
            .map(|r| Bucket::new(r as f64));
        RateLimiter {
            enabled: AtomicBool::new(bucket.is_some()),
            bucket: Mutex::new(bucket),
        }
    }

    /// Like [`RateLimiter::new`] but with an explicit burst capacity instead
    /// of the default `2x` rate (config's `rate_burst_bytes`).
    pub fn with_burst(rate_bytes_per_sec: Option<u64>, burst_bytes: Option<u64>) -> Self {
        let bucket = rate_bytes_per_sec.filter(|&r| r > 0).map(|r| {
            let burst = burst_bytes.filter(|&b| b > 0).map(|b| b as f64).unwrap_or(r as f64 * 2.0);
            Bucket::with_burst(r as f64, burst)
        });
        RateLimiter {
            enabled: AtomicBool::new(bucket.is_some()),
            bucket: Mutex::new(bucket),
        }
    }

    pub fn disabled() -> Self {
        RateLimiter::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Set (or clear, with `None`) the global rate. Burst resets to `2x` rate.
    /// Setting the same rate twice is a no-op (idempotent).
    pub fn set_rate(&self, rate_bytes_per_sec: Option<u64>) {
        let mut guard = self.bucket.lock().unwrap();
        match rate_bytes_per_sec.filter(|&r| r > 0) {
            None => {
                *guard = None;
                self.enabled.store(false, Ordering::Relaxed);
            }
            Some(r) => {
                match guard.as_mut() {
                    Some(b) if b.rate == r as f64 => {}
                    Some(b) => b.set_rate(r as f64),
                    None => *guard = Some(Bucket::new(r as f64)),
                }
                self.enabled.store(true, Ordering::Relaxed);
            }
        }
    }

    fn compute_wait(&self, n: u64) -> Duration {
        let mut guard = self.bucket.lock().unwrap();
        match guard.as_mut() {
            Some(b) => b.take(n),
            None => Duration::ZERO,
        }
    }

    /// Async consume: used by the worker's tokio-side orchestration.
    pub async fn consume(&self, n: u64) {
        let wait = self.compute_wait(n);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Blocking consume: used from the thread-per-segment download loop,
    /// matching mixed blocking-worker/async-orchestrator model.
    pub fn consume_blocking(&self, n: u64) {
        let wait = self.compute_wait(n);
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        let guard = self.bucket.lock().unwrap();
        match guard.as_ref() {
            Some(b) => RateLimiterStats {
                enabled: true,
                rate_bytes_per_sec: Some(b.rate as u64),
                burst_bytes: Some(b.burst as u64),
                available_tokens: b.tokens as i64,
            },
            None => RateLimiterStats {
                enabled: false,
                rate_bytes_per_sec: None,
                burst_bytes: None,
                available_tokens: 0,
            },
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RateLimiterStats {
    pub enabled: bool,
    pub rate_bytes_per_sec: Option<u64>,
    pub burst_bytes: Option<u64>,
    pub available_tokens: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_limiter_never_waits() {
        let rl = RateLimiter::disabled();
        assert!(!rl.is_enabled());
        assert_eq!(rl.compute_wait(u64::MAX / 2), Duration::ZERO);
    }

    #[test]
    fn consuming_within_burst_does_not_wait() {
        let rl = RateLimiter::new(Some(1000));
        assert_eq!(rl.compute_wait(500), Duration::ZERO);
    }

    #[test]
    fn debt_produces_proportional_wait() {
        let rl = RateLimiter::new(Some(1000));
        // Burst is 2000; consume 2500 -> 500 bytes of debt -> 0.5s wait.
        let wait = rl.compute_wait(2500);
        assert!((wait.as_secs_f64() - 0.5).abs() < 0.05);
    }

    #[test]
    fn set_rate_same_value_is_idempotent() {
        let rl = RateLimiter::new(Some(1000));
        rl.set_rate(Some(1000));
        let stats = rl.stats();
        assert_eq!(stats.rate_bytes_per_sec, Some(1000));
    }

    #[test]
    fn set_rate_none_disables() {
        let rl = RateLimiter::new(Some(1000));
        rl.set_rate(None);
        assert!(!rl.is_enabled());
    }

    #[tokio::test]
    async fn async_consume_is_no_op_when_disabled() {
        let rl = RateLimiter::disabled();
        let start = Instant::now();
        rl.consume(10_000_000).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
