use crate::models::ScraperType;
use serde::{Deserialize, Serialize};

/// Search parameters for one target's listing index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    /// Root of the listing website
    pub base_url: String,
    /// Whole units or rooms
    pub scraper_type: ScraperType,
    /// URL-path slug of the target area
    pub slug: String,
}

impl SearchParams {
    pub fn new(base_url: &str, scraper_type: ScraperType, slug: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            scraper_type,
            slug: slug.trim_matches('/').to_string(),
        }
    }

    /// URL of page `page` (1-based) of the index
    pub fn page_url(&self, page: u32) -> String {
        let first = format!(
            "{}/{}/{}/",
            self.base_url,
            self.scraper_type.index_path(),
            self.slug
        );
        if page <= 1 {
            first
        } else {
            format!("{}pagina-{}.htm", first, page)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_urls() {
        let params = SearchParams::new("https://www.idealista.com/", ScraperType::Room, "/segovia-segovia/");
        assert_eq!(
            params.page_url(1),
            "https://www.idealista.com/alquiler-habitacion/segovia-segovia/"
        );
        assert_eq!(
            params.page_url(3),
            "https://www.idealista.com/alquiler-habitacion/segovia-segovia/pagina-3.htm"
        );
    }
}
