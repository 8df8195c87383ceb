use super::{ListingStore, ProgressStore, TargetRegistry};
use crate::error::{Result, ScrapeError};
use crate::models::{ListingKey, Observation, ScrapedListing, ScraperProgress, ScraperType, Target};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// A persisted listing with its bookkeeping timestamps
#[derive(Debug, Clone, Serialize)]
pub struct StoredListing {
    pub id: ListingKey,
    pub target_id: i64,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub listing: ScrapedListing,
}

/// Everything the store holds, for dumping after a dry run
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub listings: Vec<StoredListing>,
    pub observations: Vec<Observation>,
    pub progress: Vec<ScraperProgress>,
}

#[derive(Default)]
struct Inner {
    targets: Vec<Target>,
    next_key: ListingKey,
    keys: HashMap<(ScraperType, String), ListingKey>,
    listings: HashMap<ListingKey, StoredListing>,
    observation_keys: HashSet<(ScraperType, ListingKey, DateTime<Utc>)>,
    observations: Vec<Observation>,
    progress: HashMap<ScraperType, ScraperProgress>,
}

/// In-process store with the same semantics as the database
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: Vec<Target>) -> Self {
        let store = Self::default();
        store.lock().targets = targets;
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicked writer cannot leave Inner half-updated; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persisted listings ordered by key
    pub fn listings(&self) -> Vec<StoredListing> {
        let inner = self.lock();
        let mut listings: Vec<_> = inner.listings.values().cloned().collect();
        listings.sort_by_key(|l| l.id);
        listings
    }

    /// Observations in insertion order
    pub fn observations(&self) -> Vec<Observation> {
        self.lock().observations.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        let progress = self.lock().progress.values().cloned().collect();
        Snapshot {
            listings: self.listings(),
            observations: self.observations(),
            progress,
        }
    }
}

#[async_trait]
impl TargetRegistry for MemoryStore {
    async fn fetch_targets(&self) -> Result<Vec<Target>> {
        Ok(self.lock().targets.clone())
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn find_listing(&self, scraper_type: ScraperType, url: &str) -> Result<Option<ListingKey>> {
        Ok(self.lock().keys.get(&(scraper_type, url.to_string())).copied())
    }

    async fn upsert_listing(&self, target_id: i64, listing: &ScrapedListing) -> Result<ListingKey> {
        if listing.url().is_empty() {
            return Err(ScrapeError::Persistence("listing without url".to_string()));
        }
        let now = Utc::now();
        let mut inner = self.lock();
        let map_key = (listing.scraper_type(), listing.url().to_string());

        if let Some(&key) = inner.keys.get(&map_key) {
            if let Some(stored) = inner.listings.get_mut(&key) {
                stored.listing = listing.clone();
                stored.target_id = target_id;
                stored.last_updated = now;
            }
            return Ok(key);
        }

        inner.next_key += 1;
        let key = inner.next_key;
        inner.keys.insert(map_key, key);
        inner.listings.insert(
            key,
            StoredListing {
                id: key,
                target_id,
                first_seen: now,
                last_updated: now,
                listing: listing.clone(),
            },
        );
        Ok(key)
    }

    async fn record_observation(
        &self,
        scraper_type: ScraperType,
        listing: ListingKey,
        price: Option<i64>,
        scraped_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.lock();
        if !inner.listings.contains_key(&listing) {
            return Err(ScrapeError::Persistence(format!("unknown listing {}", listing)));
        }
        if !inner.observation_keys.insert((scraper_type, listing, scraped_at)) {
            return Ok(false);
        }
        inner.observations.push(Observation {
            listing_id: listing,
            price,
            scraped_at,
        });
        Ok(true)
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn load_progress(&self, scraper_type: ScraperType) -> Result<Option<i64>> {
        Ok(self
            .lock()
            .progress
            .get(&scraper_type)
            .and_then(|p| p.last_processed_capital_id))
    }

    async fn save_progress(&self, scraper_type: ScraperType, target_id: Option<i64>) -> Result<()> {
        self.lock().progress.insert(
            scraper_type,
            ScraperProgress {
                scraper_type,
                last_processed_capital_id: target_id,
                last_updated: Utc::now(),
            },
        );
        Ok(())
    }
}
