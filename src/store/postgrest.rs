use super::{ListingStore, ProgressStore, TargetRegistry};
use crate::error::{Result, ScrapeError};
use crate::models::{ListingKey, ScrapedListing, ScraperType, Target};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const TARGETS_RELATION: &str = "capitals";
const PROGRESS_RELATION: &str = "scraper_status";

#[derive(Debug, Deserialize)]
struct KeyRow {
    id: ListingKey,
}

#[derive(Debug, Deserialize)]
struct ProgressRow {
    last_processed_capital_id: Option<i64>,
}

/// Client for the PostgREST API in front of the scraper database
#[derive(Clone)]
pub struct PostgrestStore {
    client: Client,
    base_url: String,
    schema: String,
}

impl PostgrestStore {
    pub fn new(base_url: &str, schema: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::Configuration(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            schema: schema.to_string(),
        })
    }

    fn endpoint(&self, relation: &str) -> String {
        format!("{}/{}", self.base_url, relation)
    }

    fn read(&self, relation: &str) -> RequestBuilder {
        self.client
            .get(self.endpoint(relation))
            .header("Accept", "application/json")
            .header("Accept-Profile", &self.schema)
    }

    fn write(&self, relation: &str, prefer: &str) -> RequestBuilder {
        self.client
            .post(self.endpoint(relation))
            .header("Content-Profile", &self.schema)
            .header("Prefer", prefer)
    }

    async fn send(&self, relation: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ScrapeError::Persistence(format!("{}: {}", relation, e)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ScrapeError::Persistence(format!(
            "{} rejected with {}: {}",
            relation, status, body
        )))
    }

    async fn json<T: serde::de::DeserializeOwned>(relation: &str, response: Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| ScrapeError::Persistence(format!("{}: unexpected response: {}", relation, e)))
    }
}

#[async_trait]
impl TargetRegistry for PostgrestStore {
    async fn fetch_targets(&self) -> Result<Vec<Target>> {
        let request = self.read(TARGETS_RELATION).query(&[
            ("select", "id,province_code,capital_name,idealista_slug,is_active"),
            ("order", "id.asc"),
        ]);
        info!("Fetching targets from {}", self.endpoint(TARGETS_RELATION));
        let response = self.send(TARGETS_RELATION, request).await?;
        let targets: Vec<Target> = Self::json(TARGETS_RELATION, response).await?;
        info!("Fetched {} targets", targets.len());
        Ok(targets)
    }
}

#[async_trait]
impl ListingStore for PostgrestStore {
    async fn find_listing(&self, scraper_type: ScraperType, url: &str) -> Result<Option<ListingKey>> {
        let relation = scraper_type.listings_relation();
        let filter = format!("eq.{}", url);
        let request = self
            .read(relation)
            .query(&[("url", filter.as_str()), ("select", "id"), ("limit", "1")]);
        let response = self.send(relation, request).await?;
        let keys: Vec<KeyRow> = Self::json(relation, response).await?;
        Ok(keys.first().map(|k| k.id))
    }

    async fn upsert_listing(&self, target_id: i64, listing: &ScrapedListing) -> Result<ListingKey> {
        let relation = listing.scraper_type().listings_relation();
        let d = listing.details();
        let mut row = json!({
            "url": d.url,
            "title": d.title,
            "location": d.location,
            "property_type": d.property_type,
            "size_sqm": d.size_sqm,
            "num_bedrooms": d.num_bedrooms,
            "advertiser_type": d.advertiser_type,
            "advertiser_name": d.advertiser_name,
            "flat_floor_number": d.flat_floor_number,
            "description": d.description,
            "pricedown_price": d.pricedown_price,
            "capital_id": target_id,
            "last_updated": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        if let ScrapedListing::Room(room) = listing {
            row["available_from"] = json!(room.available_from);
        }

        let request = self
            .write(relation, "resolution=merge-duplicates,return=representation")
            .query(&[("on_conflict", "url"), ("select", "id")])
            .json(&row);
        let response = self.send(relation, request).await?;
        let keys: Vec<KeyRow> = Self::json(relation, response).await?;
        let key = keys.first().map(|k| k.id).ok_or_else(|| {
            ScrapeError::Persistence(format!("{}: no key returned for {}", relation, d.url))
        })?;
        debug!("Upserted {} as {} #{}", d.url, relation, key);
        Ok(key)
    }

    async fn record_observation(
        &self,
        scraper_type: ScraperType,
        listing: ListingKey,
        price: Option<i64>,
        scraped_at: DateTime<Utc>,
    ) -> Result<bool> {
        let relation = scraper_type.observations_relation();
        let row = json!({
            "listing_id": listing,
            "price": price,
            "scraped_at": scraped_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        let request = self
            .write(relation, "resolution=ignore-duplicates,return=representation")
            .query(&[("on_conflict", "listing_id,scraped_at")])
            .json(&row);

        let response = request
            .send()
            .await
            .map_err(|e| ScrapeError::Persistence(format!("{}: {}", relation, e)))?;
        // Unique violation without an upsert-capable index: the row exists
        if response.status() == StatusCode::CONFLICT {
            return Ok(false);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ScrapeError::Persistence(format!(
                "{} rejected with {}: {}",
                relation, status, body
            )));
        }
        let inserted: Vec<serde_json::Value> = Self::json(relation, response).await?;
        Ok(!inserted.is_empty())
    }
}

#[async_trait]
impl ProgressStore for PostgrestStore {
    async fn load_progress(&self, scraper_type: ScraperType) -> Result<Option<i64>> {
        let filter = format!("eq.{}", scraper_type.as_str());
        let request = self.read(PROGRESS_RELATION).query(&[
            ("scraper_type", filter.as_str()),
            ("select", "last_processed_capital_id"),
        ]);
        let response = self.send(PROGRESS_RELATION, request).await?;
        let rows: Vec<ProgressRow> = Self::json(PROGRESS_RELATION, response).await?;
        // 0 is how a reset pointer is stored
        Ok(rows
            .first()
            .and_then(|row| row.last_processed_capital_id)
            .filter(|id| *id > 0))
    }

    async fn save_progress(&self, scraper_type: ScraperType, target_id: Option<i64>) -> Result<()> {
        let row = json!({
            "scraper_type": scraper_type.as_str(),
            "last_processed_capital_id": target_id.unwrap_or(0),
            "last_updated": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        let request = self
            .write(PROGRESS_RELATION, "resolution=merge-duplicates")
            .query(&[("on_conflict", "scraper_type")])
            .json(&row);
        self.send(PROGRESS_RELATION, request).await?;
        info!("Saved {} progress: {:?}", scraper_type, target_id);
        Ok(())
    }
}
