use crate::error::Result;
use crate::scrapers::identity::Identity;
use async_trait::async_trait;

/// Something that turns a listing index URL into raw markup.
/// The HTTP client implements it; tests substitute scripted pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page with the given identity, classifying failures
    async fn fetch_page(&self, url: &str, identity: &Identity) -> Result<String>;
}

/// Producer of browser-like request identities
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Produce a fresh identity for the site
    async fn fetch_identity(&self) -> anyhow::Result<Identity>;

    /// Get the name of the identity source
    fn source_name(&self) -> &'static str;
}
