//! Per-target pagination walk
//!
//! `START -> FETCH_PAGE -> PARSE_PAGE -> {CONTINUE | STOP}`. The walk stops at
//! the page ceiling, on a page without listings, on a page repeating the
//! previous page's listings, after a page that has no next link, or when
//! consecutive request failures mark the target as blocked.
//!
//! With detail pages enabled, a listing that is new to the store and whose
//! index card left fields blank has its detail page fetched before saving.

use crate::config::ScraperConfig;
use crate::error::{FailureCounts, ScrapeError};
use crate::models::{ScrapedListing, ScraperType, Target};
use crate::scrapers::fetcher::Fetcher;
use crate::scrapers::idealista::IdealistaParser;
use crate::scrapers::types::SearchParams;
use crate::store::ListingStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Why a target walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    PageCeiling,
    EmptyPage,
    RepeatedPage,
    LastPage,
    /// Consecutive request failures reached the escalation threshold
    Blocked,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::PageCeiling => "page ceiling reached",
            Self::EmptyPage => "empty page",
            Self::RepeatedPage => "page repeated previous listings",
            Self::LastPage => "no further pages",
            Self::Blocked => "blocked",
        };
        f.write_str(text)
    }
}

/// Outcome of walking one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target_id: i64,
    pub slug: String,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub listings_seen: usize,
    pub listings_saved: usize,
    pub observations_recorded: usize,
    pub details_fetched: usize,
    pub failures: FailureCounts,
    pub stop: StopReason,
}

impl TargetReport {
    fn new(target: &Target) -> Self {
        Self {
            target_id: target.id,
            slug: target.slug.clone(),
            pages_fetched: 0,
            pages_failed: 0,
            listings_seen: 0,
            listings_saved: 0,
            observations_recorded: 0,
            details_fetched: 0,
            failures: FailureCounts::default(),
            stop: StopReason::PageCeiling,
        }
    }

    /// The walk was cut short by blocking; the target must not count as done
    pub fn is_aborted(&self) -> bool {
        self.stop == StopReason::Blocked
    }
}

enum WalkState {
    Start,
    FetchPage(u32),
    ParsePage { page: u32, url: String, html: String },
    Continue(u32),
    Stop(StopReason),
}

/// Set of listing URLs on a page, used to detect pagination loops
type Fingerprint = BTreeSet<String>;

fn fingerprint(listings: &[ScrapedListing]) -> Fingerprint {
    listings.iter().map(|l| l.url().to_string()).collect()
}

/// Drives fetcher, parser and store across the pages of one target
pub struct PaginationWalker {
    fetcher: Fetcher,
    parser: IdealistaParser,
    store: Arc<dyn ListingStore>,
    scraper_type: ScraperType,
    base_url: String,
    max_pages: u32,
    fetch_details: bool,
}

impl PaginationWalker {
    pub fn new(
        fetcher: Fetcher,
        store: Arc<dyn ListingStore>,
        scraper_type: ScraperType,
        config: &ScraperConfig,
    ) -> Self {
        Self {
            fetcher,
            parser: IdealistaParser::new(),
            store,
            scraper_type,
            base_url: config.base_url.clone(),
            max_pages: config.max_pages,
            fetch_details: config.fetch_details,
        }
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Walk every page of `target`, persisting listings as they arrive.
    /// Failures are counted in the report, never returned.
    pub async fn walk(&mut self, target: &Target, scraped_at: DateTime<Utc>) -> TargetReport {
        let params = SearchParams::new(&self.base_url, self.scraper_type, &target.slug);
        let mut report = TargetReport::new(target);
        let mut previous: Option<Fingerprint> = None;
        let mut state = WalkState::Start;

        loop {
            state = match state {
                WalkState::Start => {
                    self.fetcher.reset_failures();
                    info!("Starting walk of {} ({})", target.slug, self.scraper_type);
                    WalkState::FetchPage(1)
                }

                WalkState::FetchPage(page) if page > self.max_pages => {
                    WalkState::Stop(StopReason::PageCeiling)
                }

                WalkState::FetchPage(page) => {
                    let url = params.page_url(page);
                    info!("Scraping page {} for {}: {}", page, target.slug, url);
                    match self.fetcher.fetch(&url).await {
                        Ok(html) => {
                            report.pages_fetched += 1;
                            WalkState::ParsePage { page, url, html }
                        }
                        Err(e) => {
                            report.pages_failed += 1;
                            report.failures.record(e.kind());
                            error!("Page {} of {} failed: {}", page, target.slug, e);
                            if self.fetcher.is_escalated() {
                                warn!(
                                    "{} consecutive failed requests, treating {} as blocked",
                                    self.fetcher.consecutive_failures(),
                                    target.slug
                                );
                                WalkState::Stop(StopReason::Blocked)
                            } else {
                                WalkState::Continue(page)
                            }
                        }
                    }
                }

                WalkState::ParsePage { page, url, html } => {
                    match self.parser.parse_page(&html, &url, self.scraper_type) {
                        Err(e) => {
                            report.failures.record(e.kind());
                            warn!("Skipping page {} of {}: {}", page, target.slug, e);
                            WalkState::Continue(page)
                        }
                        Ok(parsed) if parsed.listings.is_empty() => {
                            info!("No listings on page {} for {}", page, target.slug);
                            WalkState::Stop(StopReason::EmptyPage)
                        }
                        Ok(parsed) => {
                            let current = fingerprint(&parsed.listings);
                            if previous.as_ref() == Some(&current) {
                                warn!(
                                    "Page {} of {} repeats the previous page, stopping",
                                    page, target.slug
                                );
                                WalkState::Stop(StopReason::RepeatedPage)
                            } else {
                                report.listings_seen += parsed.listings.len();
                                self.persist(target, &parsed.listings, scraped_at, &mut report)
                                    .await;
                                previous = Some(current);
                                if self.fetcher.is_escalated() {
                                    warn!("Detail requests escalated, treating {} as blocked", target.slug);
                                    WalkState::Stop(StopReason::Blocked)
                                } else if parsed.has_next_page == Some(false) {
                                    WalkState::Stop(StopReason::LastPage)
                                } else {
                                    WalkState::Continue(page)
                                }
                            }
                        }
                    }
                }

                WalkState::Continue(page) => WalkState::FetchPage(page + 1),

                WalkState::Stop(reason) => {
                    report.stop = reason;
                    info!(
                        "Finished {}: {} ({} pages, {} listings saved)",
                        target.slug, reason, report.pages_fetched, report.listings_saved
                    );
                    return report;
                }
            };
        }
    }

    /// Save each listing and its observation; a failed listing is logged and
    /// skipped
    async fn persist(
        &mut self,
        target: &Target,
        listings: &[ScrapedListing],
        scraped_at: DateTime<Utc>,
        report: &mut TargetReport,
    ) {
        for listing in listings {
            let mut listing = listing.clone();
            if self.fetch_details && listing.details().has_gaps() {
                self.enrich(&mut listing, report).await;
            }

            let key = match self.store.upsert_listing(target.id, &listing).await {
                Ok(key) => key,
                Err(e) => {
                    self.record_failure(report, &listing, e);
                    continue;
                }
            };
            report.listings_saved += 1;

            match self
                .store
                .record_observation(self.scraper_type, key, listing.price(), scraped_at)
                .await
            {
                Ok(true) => report.observations_recorded += 1,
                Ok(false) => debug!("Observation for {} already recorded", listing.url()),
                Err(e) => self.record_failure(report, &listing, e),
            }
        }
    }

    /// Fill blank fields of a listing not yet in the store from its detail
    /// page. A failed detail page leaves the listing as the index showed it.
    async fn enrich(&mut self, listing: &mut ScrapedListing, report: &mut TargetReport) {
        if self.fetcher.is_escalated() {
            return;
        }
        match self.store.find_listing(self.scraper_type, listing.url()).await {
            Ok(None) => {}
            Ok(Some(_)) => return,
            Err(e) => {
                warn!("Could not look up {}, skipping its detail page: {}", listing.url(), e);
                return;
            }
        }

        let url = listing.url().to_string();
        let detail = match self.fetcher.fetch(&url).await {
            Ok(html) => self.parser.parse_detail(&html, &url),
            Err(e) => Err(e),
        };
        match detail {
            Ok(detail) => {
                detail.fill_missing(listing.details_mut());
                report.details_fetched += 1;
                debug!("Filled {} from its detail page", url);
            }
            Err(e) => {
                report.failures.record(e.kind());
                warn!("Detail page {} failed: {}", url, e);
            }
        }
    }

    fn record_failure(&self, report: &mut TargetReport, listing: &ScrapedListing, err: ScrapeError) {
        report.failures.record(err.kind());
        error!("Failed to save {}: {}", listing.url(), err);
    }
}
