//! Scraper configuration
//!
//! Defaults mirror a polite, single-threaded scraper: one request at a time,
//! a few seconds apart, with a fresh browser identity every hundred requests.

use crate::error::{Result, ScrapeError};
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://www.idealista.com";
pub const DEFAULT_POSTGREST_URL: &str = "http://localhost:3001";
pub const DEFAULT_SCHEMA: &str = "idealista_scrapper";

/// Longest pause accepted between two requests
pub const MAX_DELAY: Duration = Duration::from_secs(3600);

/// Request delay from a user-supplied number of seconds
pub fn delay_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 || secs > MAX_DELAY.as_secs_f64() {
        return Err(ScrapeError::Configuration(format!(
            "delay must be between 0 and {} seconds, got {}",
            MAX_DELAY.as_secs(),
            secs
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Configuration for a scrape run
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Root of the listing website
    pub base_url: String,

    /// Pause between consecutive requests to the site
    pub delay: Duration,

    /// Upper bound of every retry backoff
    pub max_backoff: Duration,

    /// Per-request timeout
    pub timeout: Duration,

    /// Attempts per request before the page is given up
    pub max_retries: u32,

    /// Highest page index walked per target
    pub max_pages: u32,

    /// Consecutive failed requests after which a target is treated as blocked
    pub escalation_threshold: u32,

    /// Requests served by one identity before it is replaced
    pub header_refresh_requests: u32,

    /// Maximum age of an identity
    pub header_refresh_interval: Duration,

    /// PostgREST endpoint of the persistence service
    pub postgrest_url: String,

    /// Database schema exposed through PostgREST
    pub schema: String,

    /// Fetch the page of every new listing whose index card lacks fields
    pub fetch_details: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            delay: Duration::from_secs(5),
            max_backoff: Duration::from_secs(120),
            timeout: Duration::from_secs(45),
            max_retries: 3,
            max_pages: 50,
            escalation_threshold: 6,
            header_refresh_requests: 100,
            header_refresh_interval: Duration::from_secs(3600),
            postgrest_url: DEFAULT_POSTGREST_URL.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            fetch_details: false,
        }
    }
}

impl ScraperConfig {
    /// Create a new builder
    pub fn builder() -> ScraperConfigBuilder {
        ScraperConfigBuilder::new()
    }

    /// Reject settings the scraper cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.delay > MAX_DELAY {
            return Err(ScrapeError::Configuration(format!(
                "delay must be at most {}s",
                MAX_DELAY.as_secs()
            )));
        }
        if self.max_retries == 0 {
            return Err(ScrapeError::Configuration(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.max_pages == 0 {
            return Err(ScrapeError::Configuration(
                "max_pages must be at least 1".to_string(),
            ));
        }
        if self.escalation_threshold == 0 {
            return Err(ScrapeError::Configuration(
                "escalation_threshold must be at least 1".to_string(),
            ));
        }
        if self.header_refresh_requests == 0 {
            return Err(ScrapeError::Configuration(
                "header_refresh_requests must be at least 1".to_string(),
            ));
        }
        Url::parse(&self.base_url).map_err(|e| {
            ScrapeError::Configuration(format!("invalid base url '{}': {}", self.base_url, e))
        })?;
        Url::parse(&self.postgrest_url).map_err(|e| {
            ScrapeError::Configuration(format!(
                "invalid persistence url '{}': {}",
                self.postgrest_url, e
            ))
        })?;
        if self.schema.trim().is_empty() {
            return Err(ScrapeError::Configuration("schema must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Builder for ScraperConfig
#[derive(Debug, Default)]
pub struct ScraperConfigBuilder {
    config: ScraperConfig,
}

impl ScraperConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ScraperConfig::default(),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.config.max_backoff = max_backoff;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    pub fn escalation_threshold(mut self, threshold: u32) -> Self {
        self.config.escalation_threshold = threshold;
        self
    }

    pub fn header_refresh_requests(mut self, requests: u32) -> Self {
        self.config.header_refresh_requests = requests;
        self
    }

    pub fn header_refresh_interval(mut self, interval: Duration) -> Self {
        self.config.header_refresh_interval = interval;
        self
    }

    pub fn postgrest_url(mut self, url: impl Into<String>) -> Self {
        self.config.postgrest_url = url.into();
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.config.schema = schema.into();
        self
    }

    pub fn fetch_details(mut self, enabled: bool) -> Self {
        self.config.fetch_details = enabled;
        self
    }

    pub fn build(self) -> ScraperConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScraperConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout, Duration::from_secs(45));
        assert_eq!(config.header_refresh_requests, 100);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ScraperConfig::builder()
            .max_pages(2)
            .delay(Duration::ZERO)
            .schema("public")
            .build();
        assert_eq!(config.max_pages, 2);
        assert_eq!(config.delay, Duration::ZERO);
        assert_eq!(config.schema, "public");
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let zero_retries = ScraperConfig::builder().max_retries(0).build();
        assert!(matches!(
            zero_retries.validate(),
            Err(ScrapeError::Configuration(_))
        ));

        let bad_url = ScraperConfig::builder().postgrest_url("not a url").build();
        assert!(matches!(bad_url.validate(), Err(ScrapeError::Configuration(_))));

        let empty_schema = ScraperConfig::builder().schema("  ").build();
        assert!(empty_schema.validate().is_err());

        let huge_delay = ScraperConfig::builder().delay(Duration::MAX).build();
        assert!(matches!(huge_delay.validate(), Err(ScrapeError::Configuration(_))));
    }

    #[test]
    fn test_delay_from_secs() {
        assert_eq!(delay_from_secs(2.5).unwrap(), Duration::from_millis(2500));
        assert_eq!(delay_from_secs(0.0).unwrap(), Duration::ZERO);
        for bad in [f64::INFINITY, f64::NAN, -1.0, 1e30, 3600.5] {
            assert!(
                matches!(delay_from_secs(bad), Err(ScrapeError::Configuration(_))),
                "{} accepted",
                bad
            );
        }
    }
}
