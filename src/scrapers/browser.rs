use crate::scrapers::identity::{Identity, DEFAULT_ACCEPT_LANGUAGE};
use crate::scrapers::traits::IdentitySource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the anti-bot cookie the site sets on a clean browser session
const CHALLENGE_COOKIE: &str = "datadome";

/// Identity source that opens the site in headless Chrome and copies the
/// browser's user agent, languages and anti-bot cookie
#[derive(Debug, Clone)]
pub struct BrowserIdentitySource {
    site_url: String,
    settle_time: Duration,
}

impl BrowserIdentitySource {
    pub fn new(site_url: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into(),
            settle_time: Duration::from_secs(5),
        }
    }

    /// Blocking capture; run on a blocking thread
    fn capture(site_url: &str, settle_time: Duration) -> Result<Identity> {
        info!("Launching headless Chrome...");

        let options = LaunchOptions::default_builder()
            .headless(true)
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;
        let tab = browser.new_tab()?;

        tab.navigate_to(site_url)?;
        tab.wait_until_navigated()?;

        // Let the challenge script set its cookie
        thread::sleep(settle_time);

        // Accept cookies if present
        let _ = tab.evaluate(
            r#"
            const button = document.querySelector('#didomi-notice-agree-button, button[id*="accept"]');
            if (button) button.click();
            "#,
            false,
        );
        thread::sleep(Duration::from_secs(1));

        let user_agent = tab
            .evaluate("navigator.userAgent", false)?
            .value
            .and_then(|v| v.as_str().map(str::to_string))
            .context("Browser did not report a user agent")?;

        let accept_language = tab
            .evaluate("(navigator.languages || []).join(',')", false)?
            .value
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|langs| !langs.is_empty())
            .unwrap_or_else(|| DEFAULT_ACCEPT_LANGUAGE.to_string());

        let cookies = tab.get_cookies().context("Failed to read browser cookies")?;
        let challenge = cookies
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(CHALLENGE_COOKIE))
            .map(|c| format!("{}={}", c.name, c.value));

        match &challenge {
            Some(cookie) => debug!(
                "Captured cookie {}...",
                cookie.chars().take(24).collect::<String>()
            ),
            None => warn!("No {} cookie set by {}", CHALLENGE_COOKIE, site_url),
        }

        let mut identity = Identity::new(desktop_user_agent(&user_agent));
        identity.accept_language = accept_language;
        if let Some(cookie) = challenge {
            identity = identity.with_cookie(cookie);
        }
        Ok(identity)
    }
}

/// The user agent a headed Chrome of the same build would send
fn desktop_user_agent(reported: &str) -> String {
    reported.replace("HeadlessChrome/", "Chrome/")
}

#[async_trait]
impl IdentitySource for BrowserIdentitySource {
    async fn fetch_identity(&self) -> Result<Identity> {
        let site_url = self.site_url.clone();
        let settle_time = self.settle_time;
        let identity = tokio::task::spawn_blocking(move || Self::capture(&site_url, settle_time))
            .await
            .context("Browser capture task panicked")??;
        info!("Captured browser identity: {}", identity.user_agent);
        Ok(identity)
    }

    fn source_name(&self) -> &'static str {
        "headless-chrome"
    }
}
