use anyhow::{Context, Result};
use clap::Parser;
use rental_scout::batch::{run_timestamp, BatchRunner};
use rental_scout::config::{
    delay_from_secs, ScraperConfig, DEFAULT_BASE_URL, DEFAULT_POSTGREST_URL, DEFAULT_SCHEMA,
};
use rental_scout::models::{ScraperType, Target};
use rental_scout::progress::ProgressTracker;
use rental_scout::scrapers::{
    BrowserIdentitySource, FallbackIdentitySource, Fetcher, HttpPageSource, IdentityProvider,
    IdentitySource, StaticIdentitySource,
};
use rental_scout::store::{ListingStore, MemoryStore, PostgrestStore, ProgressStore, TargetRegistry};
use rental_scout::walker::PaginationWalker;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DRY_RUN_OUTPUT: &str = "scraped_listings.json";

/// Rental listing scraper with resumable batches
#[derive(Parser, Debug)]
#[command(name = "rental-scout", version, about)]
struct Args {
    /// Listing category: viviendas (whole-unit) or habitacion (room)
    property_type: ScraperType,

    /// Root URL of the listing site
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Seconds between requests
    #[arg(long, default_value_t = 5.0)]
    delay: f64,

    /// Highest page walked per target
    #[arg(long, default_value_t = 50)]
    max_pages: u32,

    /// Attempts per request
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 45)]
    timeout: u64,

    /// PostgREST endpoint
    #[arg(long, env = "POSTGREST_URL", default_value = DEFAULT_POSTGREST_URL)]
    postgrest_url: String,

    /// Database schema exposed by PostgREST
    #[arg(long, env = "POSTGREST_SCHEMA", default_value = DEFAULT_SCHEMA)]
    schema: String,

    /// Cookie string captured from a real browser session
    #[arg(long, env = "SCRAPER_COOKIE", conflicts_with = "browser_identity")]
    cookie: Option<String>,

    /// Capture request identity with headless Chrome
    #[arg(long)]
    browser_identity: bool,

    /// Fetch the detail page of new listings to fill fields the index leaves blank
    #[arg(long)]
    details: bool,

    /// Keep everything in memory and dump it to scraped_listings.json
    #[arg(long, requires = "targets_file")]
    dry_run: bool,

    /// JSON array of targets used by --dry-run
    #[arg(long)]
    targets_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> Result<ScraperConfig> {
        let config = ScraperConfig::builder()
            .base_url(self.base_url.trim_end_matches('/'))
            .delay(delay_from_secs(self.delay)?)
            .max_pages(self.max_pages)
            .max_retries(self.max_retries)
            .timeout(Duration::from_secs(self.timeout))
            .postgrest_url(self.postgrest_url.clone())
            .schema(self.schema.clone())
            .fetch_details(self.details)
            .build();
        Ok(config)
    }

    fn identity_source(&self, config: &ScraperConfig) -> Arc<dyn IdentitySource> {
        if self.browser_identity {
            Arc::new(BrowserIdentitySource::new(config.base_url.clone()))
        } else if let Some(cookie) = &self.cookie {
            Arc::new(StaticIdentitySource::new(cookie.clone()))
        } else {
            Arc::new(FallbackIdentitySource)
        }
    }
}

async fn load_targets(path: &Path) -> Result<Vec<Target>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read targets file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse targets file {}", path.display()))
}

type Stores = (Arc<dyn TargetRegistry>, Arc<dyn ListingStore>, Arc<dyn ProgressStore>);

fn split_store<S>(store: Arc<S>) -> Stores
where
    S: TargetRegistry + ListingStore + ProgressStore + 'static,
{
    (store.clone(), store.clone(), store)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "rental_scout=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🏠 Rental Scout - {} scraper", args.property_type);
    info!("==========================================");

    let config = args.config()?;
    config.validate()?;

    let scraper_type = args.property_type;
    let identity_source = args.identity_source(&config);
    info!("Using {} identity source", identity_source.source_name());

    let memory = if args.dry_run {
        let path = args
            .targets_file
            .as_ref()
            .context("--dry-run needs --targets-file")?;
        let targets = load_targets(path).await?;
        info!("Dry run with {} targets from {}", targets.len(), path.display());
        Some(Arc::new(MemoryStore::with_targets(targets)))
    } else {
        None
    };

    let (registry, listings, progress) = match &memory {
        Some(store) => split_store(store.clone()),
        None => {
            info!("Persisting to {} (schema {})", config.postgrest_url, config.schema);
            split_store(Arc::new(PostgrestStore::new(
                &config.postgrest_url,
                &config.schema,
                config.timeout,
            )?))
        }
    };

    let identity = IdentityProvider::new(
        identity_source,
        config.header_refresh_requests,
        config.header_refresh_interval,
    );
    let fetcher = Fetcher::new(Arc::new(HttpPageSource::new(config.timeout)?), identity, &config);
    let walker = PaginationWalker::new(fetcher, listings, scraper_type, &config);
    let tracker = ProgressTracker::new(progress, scraper_type);
    let mut runner = BatchRunner::new(registry, tracker, walker, scraper_type);

    let scraped_at = run_timestamp();
    info!("Run timestamp: {}", scraped_at);

    let summary = tokio::select! {
        result = runner.run(scraped_at) => Some(result?),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, progress is kept at the last completed target");
            None
        }
    };

    if let Some(summary) = &summary {
        summary.print();
    }

    if let Some(store) = memory {
        let json = serde_json::to_string_pretty(&store.snapshot())?;
        tokio::fs::write(DRY_RUN_OUTPUT, json).await?;
        info!("💾 Saved {} listings to {}", store.listings().len(), DRY_RUN_OUTPUT);
    }

    Ok(())
}
