use governor::{DefaultKeyedRateLimiter, Jitter, Quota};
use rand::Rng;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Keeps requests to the same domain at least 0.7x and at most 1.3x the
/// configured delay apart
pub struct RateLimiter {
    limiter: Option<DefaultKeyedRateLimiter<String>>,
    spread: Duration,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        // A zero delay has no quota: every request goes through at once
        let limiter = Quota::with_period(delay.mul_f64(0.7)).map(governor::RateLimiter::keyed);
        Self {
            limiter,
            spread: delay.mul_f64(0.6),
        }
    }

    /// Wait until the domain of `url` may be hit again, then claim the slot
    pub async fn wait(&self, url: &str) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        let domain = domain_of(url);
        debug!("Waiting for a request slot on {}", domain);
        limiter
            .until_key_ready_with_jitter(&domain, Jitter::new(Duration::ZERO, self.spread))
            .await;
    }
}

/// Exponential backoff with jitter, capped
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Pause before retry number `attempt` (0-based). A rate-limited
    /// response doubles the pause.
    pub fn delay(&self, attempt: u32, rate_limited: bool) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let mut pause = self.base.saturating_mul(factor);
        if rate_limited {
            pause = pause.saturating_mul(2);
        }
        let jitter = jittered(self.base, 0.0, 0.5);
        pause.saturating_add(jitter).min(self.cap)
    }
}

/// `base` scaled by a random factor in `[low, high]`
fn jittered(base: Duration, low: f64, high: f64) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let factor = rand::thread_rng().gen_range(low..=high);
    base.mul_f64(factor)
}

fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(60));

        let first = backoff.delay(0, false);
        assert!(first >= Duration::from_secs(5) && first <= Duration::from_millis(7500));

        let third = backoff.delay(2, false);
        assert!(third >= Duration::from_secs(20) && third <= Duration::from_millis(22500));

        assert_eq!(backoff.delay(10, false), Duration::from_secs(60));
        assert_eq!(backoff.delay(u32::MAX, true), Duration::from_secs(60));
    }

    #[test]
    fn test_rate_limited_backoff_doubles() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(600));
        let pause = backoff.delay(1, true);
        assert!(pause >= Duration::from_secs(4) && pause <= Duration::from_millis(4500));
    }

    #[test]
    fn test_zero_base_never_sleeps() {
        let backoff = Backoff::new(Duration::ZERO, Duration::from_secs(60));
        assert_eq!(backoff.delay(3, true), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_zero_delay_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        assert!(limiter.limiter.is_none());
        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait("https://www.idealista.com/alquiler-viviendas/").await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_same_domain() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let start = Instant::now();
        limiter.wait("https://example.com/a").await;
        limiter.wait("https://example.com/b").await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(65), "waited only {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_rate_limiter_keys_by_domain() {
        let limiter = RateLimiter::new(Duration::from_secs(2));
        let start = Instant::now();
        limiter.wait("https://www.idealista.com/alquiler-viviendas/").await;
        limiter.wait("http://localhost:3001/capitals").await;
        limiter.wait("https://example.com/").await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("https://www.idealista.com/inmueble/1/"), "www.idealista.com");
        assert_eq!(domain_of("not a url"), "not a url");
    }
}
