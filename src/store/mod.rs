//! Persistence gateway
//!
//! The scraper talks to storage through three narrow traits: the target
//! registry, the listing/observation store and the progress store. The
//! production implementation is a PostgREST client; an in-memory store backs
//! dry runs and tests.

mod memory;
mod postgrest;

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;

use crate::error::Result;
use crate::models::{ListingKey, ScrapedListing, ScraperType, Target};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of scrape targets
#[async_trait]
pub trait TargetRegistry: Send + Sync {
    /// All targets, active or not, in registry order
    async fn fetch_targets(&self) -> Result<Vec<Target>>;
}

/// Listing static attributes and their price history
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Key of the listing stored under `url`, if any
    async fn find_listing(&self, scraper_type: ScraperType, url: &str) -> Result<Option<ListingKey>>;

    /// Insert the listing if its URL is unseen, otherwise overwrite its
    /// static fields. Returns the stable listing key.
    async fn upsert_listing(&self, target_id: i64, listing: &ScrapedListing) -> Result<ListingKey>;

    /// Append a price observation. Returns `false` when a row for the same
    /// listing and timestamp already exists (nothing written).
    async fn record_observation(
        &self,
        scraper_type: ScraperType,
        listing: ListingKey,
        price: Option<i64>,
        scraped_at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Resume pointer per scraper type
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Last fully processed target id, `None` if no run was recorded
    async fn load_progress(&self, scraper_type: ScraperType) -> Result<Option<i64>>;

    /// Overwrite the resume pointer (`None` resets it)
    async fn save_progress(&self, scraper_type: ScraperType, target_id: Option<i64>) -> Result<()>;
}
