pub mod batch;
pub mod config;
pub mod error;
pub mod models;
pub mod progress;
pub mod scrapers;
pub mod store;
pub mod walker;

pub use batch::{BatchRunner, RunSummary};
pub use config::ScraperConfig;
pub use error::{FailureKind, ScrapeError};
pub use models::{ScrapedListing, ScraperType, Target};
