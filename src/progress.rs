//! Resumable batch state
//!
//! One resume pointer per scraper type: the id of the last target whose walk
//! finished. A batch starts strictly after it and wraps to the beginning of
//! the registry once every target has been covered.

use crate::error::Result;
use crate::models::{ScraperType, Target};
use crate::store::ProgressStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Targets to walk in this batch
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePlan {
    pub targets: Vec<Target>,
    /// The previous cycle was complete and the plan starts over
    pub wrapped: bool,
}

/// Active targets in registry order (ascending id) strictly after `resume`.
/// When none remain, start a new cycle with every active target.
pub fn plan_targets(registry: &[Target], resume: Option<i64>) -> ResumePlan {
    let mut ordered: Vec<&Target> = registry.iter().collect();
    ordered.sort_by_key(|t| t.id);

    let after: Vec<Target> = ordered
        .iter()
        .filter(|t| t.is_active && resume.map_or(true, |r| t.id > r))
        .map(|t| (*t).clone())
        .collect();

    if !after.is_empty() || resume.is_none() {
        return ResumePlan {
            targets: after,
            wrapped: false,
        };
    }

    ResumePlan {
        targets: ordered
            .into_iter()
            .filter(|t| t.is_active)
            .cloned()
            .collect(),
        wrapped: true,
    }
}

/// Reads and advances the resume pointer of one scraper type
pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
    scraper_type: ScraperType,
    current: Option<i64>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn ProgressStore>, scraper_type: ScraperType) -> Self {
        Self {
            store,
            scraper_type,
            current: None,
        }
    }

    /// Last fully processed target, `None` if no run was recorded. An
    /// unreadable pointer is treated as "start from the beginning".
    pub async fn get_resume_point(&mut self) -> Option<i64> {
        match self.store.load_progress(self.scraper_type).await {
            Ok(point) => {
                match point {
                    Some(id) => info!("Resuming {} scrape after target {}", self.scraper_type, id),
                    None => info!("No previous {} progress, starting from the beginning", self.scraper_type),
                }
                self.current = point;
                point
            }
            Err(e) => {
                warn!(
                    "Could not read {} progress, starting from the beginning: {}",
                    self.scraper_type, e
                );
                self.current = None;
                None
            }
        }
    }

    /// Move the pointer to `target_id`. Only forward moves are written;
    /// anything at or behind the current pointer is ignored.
    pub async fn advance(&mut self, target_id: i64) -> Result<()> {
        if let Some(current) = self.current {
            if target_id <= current {
                warn!(
                    "Ignoring backward {} progress move {} -> {}",
                    self.scraper_type, current, target_id
                );
                return Ok(());
            }
        }
        self.store
            .save_progress(self.scraper_type, Some(target_id))
            .await?;
        self.current = Some(target_id);
        Ok(())
    }

    /// Start a new cycle
    pub async fn reset(&mut self) -> Result<()> {
        info!("All {} targets processed, starting a new cycle", self.scraper_type);
        self.store.save_progress(self.scraper_type, None).await?;
        self.current = None;
        Ok(())
    }

    pub fn current(&self) -> Option<i64> {
        self.current
    }
}
