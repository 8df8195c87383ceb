//! Batch runner: walks every due target of one scraper type in registry order

use crate::error::{FailureCounts, FailureKind, Result, ScrapeError};
use crate::models::ScraperType;
use crate::progress::{plan_targets, ProgressTracker};
use crate::store::TargetRegistry;
use crate::walker::{PaginationWalker, TargetReport};
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

/// Timestamp shared by every observation of one run
pub fn run_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// What one batch run did
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub scraper_type: ScraperType,
    pub scraped_at: DateTime<Utc>,
    pub targets_attempted: usize,
    pub targets_completed: usize,
    pub targets_aborted: usize,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub listings_saved: usize,
    pub observations_recorded: usize,
    pub details_fetched: usize,
    pub failures: FailureCounts,
    /// The run started a new cycle over the registry
    pub wrapped: bool,
    pub reports: Vec<TargetReport>,
}

impl RunSummary {
    fn new(scraper_type: ScraperType, scraped_at: DateTime<Utc>) -> Self {
        Self {
            scraper_type,
            scraped_at,
            targets_attempted: 0,
            targets_completed: 0,
            targets_aborted: 0,
            pages_fetched: 0,
            pages_failed: 0,
            listings_saved: 0,
            observations_recorded: 0,
            details_fetched: 0,
            failures: FailureCounts::default(),
            wrapped: false,
            reports: Vec::new(),
        }
    }

    fn add(&mut self, report: TargetReport) {
        self.targets_attempted += 1;
        if report.is_aborted() {
            self.targets_aborted += 1;
        } else {
            self.targets_completed += 1;
        }
        self.pages_fetched += report.pages_fetched;
        self.pages_failed += report.pages_failed;
        self.listings_saved += report.listings_saved;
        self.observations_recorded += report.observations_recorded;
        self.details_fetched += report.details_fetched;
        self.failures.merge(&report.failures);
        self.reports.push(report);
    }

    /// Every attempted target finished without being blocked
    pub fn is_clean(&self) -> bool {
        self.targets_aborted == 0
    }

    pub fn log(&self) {
        info!(
            "{} run finished: {} targets attempted, {} completed, {} aborted, {} pages, {} listings saved, {} observations",
            self.scraper_type,
            self.targets_attempted,
            self.targets_completed,
            self.targets_aborted,
            self.pages_fetched,
            self.listings_saved,
            self.observations_recorded
        );
        if self.details_fetched > 0 {
            info!("{} listings filled from detail pages", self.details_fetched);
        }
        for kind in FailureKind::ALL {
            let count = self.failures.count(kind);
            if count > 0 {
                warn!("{} {} failures", count, kind);
            }
        }
    }

    /// Human-readable table on stdout
    pub fn print(&self) {
        println!();
        println!("{:<32} {:>6} {:>6} {:>9} {:>8}  {}", "target", "pages", "failed", "listings", "failures", "stop");
        println!("{}", "-".repeat(80));
        for report in &self.reports {
            println!(
                "{:<32} {:>6} {:>6} {:>9} {:>8}  {}",
                report.slug,
                report.pages_fetched,
                report.pages_failed,
                report.listings_saved,
                report.failures.total(),
                report.stop
            );
        }
        println!("{}", "-".repeat(80));
        println!(
            "{} targets ({} completed, {} aborted), {} pages, {} listings, {} new observations",
            self.targets_attempted,
            self.targets_completed,
            self.targets_aborted,
            self.pages_fetched,
            self.listings_saved,
            self.observations_recorded
        );
        for kind in FailureKind::ALL {
            let count = self.failures.count(kind);
            if count > 0 {
                println!("  {} failures: {}", kind, count);
            }
        }
    }
}

pub struct BatchRunner {
    registry: Arc<dyn TargetRegistry>,
    progress: ProgressTracker,
    walker: PaginationWalker,
    scraper_type: ScraperType,
}

impl BatchRunner {
    pub fn new(
        registry: Arc<dyn TargetRegistry>,
        progress: ProgressTracker,
        walker: PaginationWalker,
        scraper_type: ScraperType,
    ) -> Self {
        Self {
            registry,
            progress,
            walker,
            scraper_type,
        }
    }

    /// Walk the due targets one after another. Only an unreadable or empty
    /// registry fails the run; everything below that ends up in the summary.
    pub async fn run(&mut self, scraped_at: DateTime<Utc>) -> Result<RunSummary> {
        let registry = self.registry.fetch_targets().await.map_err(|e| {
            ScrapeError::Configuration(format!("cannot load target registry: {}", e))
        })?;
        if !registry.iter().any(|t| t.is_active) {
            return Err(ScrapeError::Configuration(
                "target registry has no active targets".to_string(),
            ));
        }

        let resume = self.progress.get_resume_point().await;
        let plan = plan_targets(&registry, resume);
        let mut summary = RunSummary::new(self.scraper_type, scraped_at);
        summary.wrapped = plan.wrapped;

        if plan.wrapped {
            if let Err(e) = self.progress.reset().await {
                error!("Could not reset {} progress: {}", self.scraper_type, e);
                summary.failures.record(e.kind());
            }
        }

        info!(
            "Processing {} {} targets ({} in registry)",
            plan.targets.len(),
            self.scraper_type,
            registry.len()
        );

        for target in &plan.targets {
            let span = info_span!("target", id = target.id, slug = %target.slug);
            let report = self.walker.walk(target, scraped_at).instrument(span).await;

            if report.is_aborted() {
                warn!(
                    "Target {} aborted after {} pages, progress stays at {:?}",
                    target.slug,
                    report.pages_fetched,
                    self.progress.current()
                );
            } else if let Err(e) = self.progress.advance(target.id).await {
                error!("Could not save progress after {}: {}", target.slug, e);
                summary.failures.record(e.kind());
            }
            summary.add(report);
        }

        summary.log();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScraperConfig;
    use crate::models::Target;
    use crate::scrapers::fetcher::Fetcher;
    use crate::scrapers::identity::{FallbackIdentitySource, Identity, IdentityProvider};
    use crate::scrapers::traits::PageSource;
    use crate::store::{MemoryStore, ProgressStore};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoPages;

    #[async_trait]
    impl PageSource for NoPages {
        async fn fetch_page(&self, _url: &str, _identity: &Identity) -> Result<String> {
            Ok(r#"<main class="listing-items"></main>"#.to_string())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl TargetRegistry for Unreachable {
        async fn fetch_targets(&self) -> Result<Vec<Target>> {
            Err(ScrapeError::Network("connection refused".into()))
        }
    }

    fn runner(registry: Arc<dyn TargetRegistry>, store: Arc<MemoryStore>) -> BatchRunner {
        let config = ScraperConfig::builder().delay(Duration::ZERO).build();
        let identity =
            IdentityProvider::new(Arc::new(FallbackIdentitySource), 100, Duration::from_secs(3600));
        let fetcher = Fetcher::new(Arc::new(NoPages), identity, &config);
        let walker = PaginationWalker::new(fetcher, store.clone(), ScraperType::Room, &config);
        let progress = ProgressTracker::new(store, ScraperType::Room);
        BatchRunner::new(registry, progress, walker, ScraperType::Room)
    }

    fn target(id: i64, active: bool) -> Target {
        Target {
            id,
            province_code: String::new(),
            name: format!("City {}", id),
            slug: format!("city-{}", id),
            is_active: active,
        }
    }

    #[test]
    fn test_run_timestamp_has_whole_seconds() {
        assert_eq!(run_timestamp().timestamp_subsec_nanos(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_registry_is_configuration_error() {
        let store = Arc::new(MemoryStore::new());
        let mut runner = runner(Arc::new(Unreachable), store);
        let result = runner.run(run_timestamp()).await;
        assert!(matches!(result, Err(ScrapeError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_registry_without_active_targets_is_configuration_error() {
        let store = Arc::new(MemoryStore::with_targets(vec![target(1, false)]));
        let mut runner = runner(store.clone(), store);
        let result = runner.run(run_timestamp()).await;
        assert!(matches!(result, Err(ScrapeError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_completed_targets_advance_progress() {
        let store = Arc::new(MemoryStore::with_targets(vec![target(2, true), target(1, true)]));
        let mut runner = runner(store.clone(), store.clone());

        let summary = runner.run(run_timestamp()).await.unwrap();

        assert_eq!(summary.targets_attempted, 2);
        assert_eq!(summary.targets_completed, 2);
        assert!(summary.is_clean());
        assert_eq!(
            summary.reports.iter().map(|r| r.target_id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(store.load_progress(ScraperType::Room).await.unwrap(), Some(2));
    }
}
