use crate::scrapers::traits::IdentitySource;
use anyhow::Result;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, COOKIE, USER_AGENT,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "es-ES,es;q=0.9,en;q=0.8";
/// Encodings the HTTP client decodes transparently
pub const DEFAULT_ACCEPT_ENCODING: &str = "gzip, deflate, br";

const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
];

fn default_accept_encoding() -> String {
    DEFAULT_ACCEPT_ENCODING.to_string()
}

/// Browser-like request identity sent with every page request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    #[serde(default = "default_accept_encoding")]
    pub accept_encoding: String,
    pub cookie: Option<String>,
}

impl Identity {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            accept: DEFAULT_ACCEPT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            accept_encoding: default_accept_encoding(),
            cookie: None,
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        let cookie = cookie.into();
        self.cookie = if cookie.trim().is_empty() {
            None
        } else {
            Some(cookie)
        };
        self
    }

    /// Request headers for this identity; values that are not valid
    /// header text are dropped
    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let pairs = [
            (USER_AGENT, Some(self.user_agent.as_str())),
            (ACCEPT, Some(self.accept.as_str())),
            (ACCEPT_LANGUAGE, Some(self.accept_language.as_str())),
            (ACCEPT_ENCODING, Some(self.accept_encoding.as_str())),
            (COOKIE, self.cookie.as_deref()),
        ];
        for (name, value) in pairs {
            let Some(value) = value else { continue };
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(_) => warn!("Dropping invalid {} header value", name),
            }
        }
        headers
    }
}

/// Identity built from a pool of common desktop user agents
#[derive(Debug, Clone, Default)]
pub struct FallbackIdentitySource;

impl FallbackIdentitySource {
    pub fn random_identity(&self) -> Identity {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        Identity::new(user_agent)
    }
}

#[async_trait]
impl IdentitySource for FallbackIdentitySource {
    async fn fetch_identity(&self) -> Result<Identity> {
        Ok(self.random_identity())
    }

    fn source_name(&self) -> &'static str {
        "fallback"
    }
}

/// Fallback identity carrying a cookie captured outside the scraper
#[derive(Debug, Clone)]
pub struct StaticIdentitySource {
    cookie: String,
}

impl StaticIdentitySource {
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
        }
    }
}

#[async_trait]
impl IdentitySource for StaticIdentitySource {
    async fn fetch_identity(&self) -> Result<Identity> {
        Ok(FallbackIdentitySource
            .random_identity()
            .with_cookie(self.cookie.clone()))
    }

    fn source_name(&self) -> &'static str {
        "static-cookie"
    }
}

/// Holds the identity in use for a run and decides when to replace it.
///
/// The identity is replaced wholesale: on first use, after
/// `refresh_requests` requests, once it is older than `refresh_interval`,
/// or when the fetcher asks for it after a failed attempt.
pub struct IdentityProvider {
    source: Arc<dyn IdentitySource>,
    fallback: FallbackIdentitySource,
    current: Option<Identity>,
    requests: u32,
    refreshed_at: Option<Instant>,
    refresh_requests: u32,
    refresh_interval: Duration,
    refreshes: u32,
}

impl IdentityProvider {
    pub fn new(
        source: Arc<dyn IdentitySource>,
        refresh_requests: u32,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            source,
            fallback: FallbackIdentitySource,
            current: None,
            requests: 0,
            refreshed_at: None,
            refresh_requests,
            refresh_interval,
            refreshes: 0,
        }
    }

    pub fn needs_refresh(&self) -> bool {
        let stale = self
            .refreshed_at
            .map(|at| at.elapsed() >= self.refresh_interval)
            .unwrap_or(true);
        self.current.is_none() || self.requests >= self.refresh_requests || stale
    }

    /// Current identity, refreshed first if it is due
    pub async fn identity(&mut self) -> Identity {
        if self.needs_refresh() {
            let reason = if self.current.is_none() {
                "initial"
            } else if self.requests >= self.refresh_requests {
                "request count"
            } else {
                "age"
            };
            self.refresh(reason).await;
        }
        match &self.current {
            Some(identity) => identity.clone(),
            None => self.fallback.random_identity(),
        }
    }

    /// Replace the identity, falling back to the built-in pool if the
    /// configured source fails
    pub async fn refresh(&mut self, reason: &str) {
        info!(
            "Refreshing identity via {} (reason: {}, requests: {})",
            self.source.source_name(),
            reason,
            self.requests
        );
        let identity = match self.source.fetch_identity().await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(
                    "Identity source {} failed, using fallback: {:#}",
                    self.source.source_name(),
                    e
                );
                self.fallback.random_identity()
            }
        };
        debug!("Using User-Agent: {}", identity.user_agent);
        self.current = Some(identity);
        self.requests = 0;
        self.refreshed_at = Some(Instant::now());
        self.refreshes += 1;
    }

    pub fn record_request(&mut self) {
        self.requests += 1;
    }

    /// Number of refreshes performed so far
    pub fn refresh_count(&self) -> u32 {
        self.refreshes
    }
}
