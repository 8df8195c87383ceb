use crate::config::ScraperConfig;
use crate::error::{Result, ScrapeError};
use crate::scrapers::identity::{Identity, IdentityProvider};
use crate::scrapers::throttle::{Backoff, RateLimiter};
use crate::scrapers::traits::PageSource;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Fragments that only appear on anti-bot challenge pages
const CHALLENGE_MARKERS: [&str; 4] = [
    "captcha-delivery.com",
    "geo.captcha",
    "Pardon Our Interruption",
    "Access denied",
];

/// Plain HTTP page source
pub struct HttpPageSource {
    client: Client,
}

impl HttpPageSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::Configuration(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(&self, url: &str, identity: &Identity) -> Result<String> {
        debug!("Fetching URL: {}", url);

        let response = self
            .client
            .get(url)
            .headers(identity.to_headers())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ScrapeError::block(Some(status.as_u16()), "request refused"));
        }
        if !status.is_success() {
            return Err(ScrapeError::block(Some(status.as_u16()), "unexpected status"));
        }

        let html = response.text().await?;
        debug!("Downloaded {} bytes of HTML", html.len());

        if html.trim().is_empty() {
            return Err(ScrapeError::block(Some(status.as_u16()), "empty body"));
        }
        if let Some(marker) = CHALLENGE_MARKERS.iter().find(|m| html.contains(*m)) {
            return Err(ScrapeError::block(
                Some(status.as_u16()),
                format!("challenge page ({})", marker),
            ));
        }
        Ok(html)
    }
}

/// Fetches pages one at a time with throttling, identity rotation and
/// retry/backoff. Counts consecutive failed requests so the walker can
/// tell a flaky page from a blocked target.
pub struct Fetcher {
    source: Arc<dyn PageSource>,
    identity: IdentityProvider,
    limiter: RateLimiter,
    backoff: Backoff,
    max_retries: u32,
    escalation_threshold: u32,
    consecutive_failures: u32,
    requests: u64,
}

impl Fetcher {
    pub fn new(source: Arc<dyn PageSource>, identity: IdentityProvider, config: &ScraperConfig) -> Self {
        Self {
            source,
            identity,
            limiter: RateLimiter::new(config.delay),
            backoff: Backoff::new(config.delay, config.max_backoff),
            max_retries: config.max_retries,
            escalation_threshold: config.escalation_threshold,
            consecutive_failures: 0,
            requests: 0,
        }
    }

    /// Fetch `url`, retrying network failures and block signals. Returns the
    /// last error once attempts are exhausted or the target is escalated.
    pub async fn fetch(&mut self, url: &str) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            self.limiter.wait(url).await;
            let identity = self.identity.identity().await;

            info!("Requesting {} (attempt {}/{})", url, attempt + 1, self.max_retries);
            let result = self.source.fetch_page(url, &identity).await;
            self.identity.record_request();
            self.requests += 1;

            match result {
                Ok(html) => {
                    self.consecutive_failures = 0;
                    return Ok(html);
                }
                Err(e) if e.is_retryable() => {
                    self.consecutive_failures += 1;
                    warn!(
                        "Attempt {} for {} failed: {} ({} consecutive failures)",
                        attempt + 1,
                        url,
                        e,
                        self.consecutive_failures
                    );
                    let rate_limited = e.status() == Some(StatusCode::TOO_MANY_REQUESTS.as_u16());
                    last_error = Some(e);

                    if self.is_escalated() || attempt + 1 == self.max_retries {
                        break;
                    }
                    // Any failure may be a block; do not retry with the same identity
                    self.identity.refresh("failed attempt").await;
                    let pause = self.backoff.delay(attempt, rate_limited);
                    info!("Waiting {:.1}s before retry...", pause.as_secs_f64());
                    tokio::time::sleep(pause).await;
                }
                Err(e) => return Err(e),
            }
        }

        let err = last_error.unwrap_or_else(|| ScrapeError::Network("no attempts made".to_string()));
        error!("Giving up on {}: {}", url, err);
        Err(err)
    }

    /// Consecutive failed requests have reached the escalation threshold
    pub fn is_escalated(&self) -> bool {
        self.consecutive_failures >= self.escalation_threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Start a new target with a clean failure streak
    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Requests issued over the fetcher's lifetime
    pub fn request_count(&self) -> u64 {
        self.requests
    }

    pub fn identity_refreshes(&self) -> u32 {
        self.identity.refresh_count()
    }
}
