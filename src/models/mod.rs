use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Listing index being scraped: whole units or single rooms
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScraperType {
    #[serde(rename = "viviendas")]
    WholeUnit,
    #[serde(rename = "habitacion")]
    Room,
}

impl ScraperType {
    /// Key used for the progress row and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WholeUnit => "viviendas",
            Self::Room => "habitacion",
        }
    }

    /// Path segment of the site's rental index
    pub fn index_path(&self) -> &'static str {
        match self {
            Self::WholeUnit => "alquiler-viviendas",
            Self::Room => "alquiler-habitacion",
        }
    }

    pub fn listings_relation(&self) -> &'static str {
        match self {
            Self::WholeUnit => "listings",
            Self::Room => "rooms",
        }
    }

    pub fn observations_relation(&self) -> &'static str {
        match self {
            Self::WholeUnit => "observations",
            Self::Room => "rooms_observations",
        }
    }
}

impl fmt::Display for ScraperType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScraperType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viviendas" | "whole-unit" => Ok(Self::WholeUnit),
            "habitacion" | "room" => Ok(Self::Room),
            other => Err(format!(
                "unknown property type '{}', expected viviendas or habitacion",
                other
            )),
        }
    }
}

/// A scrapeable area (capital city or region)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub id: i64,
    #[serde(default)]
    pub province_code: String,
    #[serde(rename = "capital_name", default)]
    pub name: String,
    #[serde(rename = "idealista_slug")]
    pub slug: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Static attributes shared by whole-unit and room listings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListingDetails {
    pub url: String,
    pub title: Option<String>,
    pub location: Option<String>,
    pub property_type: Option<String>,
    pub size_sqm: Option<i64>,
    pub num_bedrooms: Option<i64>,
    pub advertiser_type: Option<String>,
    pub advertiser_name: Option<String>,
    pub flat_floor_number: Option<String>,
    pub description: Option<String>,
    pub pricedown_price: Option<i64>,
}

impl ListingDetails {
    /// Some descriptive field the index card did not show
    pub fn has_gaps(&self) -> bool {
        self.location.is_none()
            || self.size_sqm.is_none()
            || self.num_bedrooms.is_none()
            || self.flat_floor_number.is_none()
            || self.description.is_none()
    }
}

/// Whole apartment or house for rent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitListing {
    pub details: ListingDetails,
    pub price: Option<i64>,
}

/// Single room in a shared flat
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomListing {
    pub details: ListingDetails,
    pub price: Option<i64>,
    pub available_from: Option<String>,
}

/// One record extracted from a listing index page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScrapedListing {
    Unit(UnitListing),
    Room(RoomListing),
}

impl ScrapedListing {
    pub fn details(&self) -> &ListingDetails {
        match self {
            Self::Unit(unit) => &unit.details,
            Self::Room(room) => &room.details,
        }
    }

    pub fn details_mut(&mut self) -> &mut ListingDetails {
        match self {
            Self::Unit(unit) => &mut unit.details,
            Self::Room(room) => &mut room.details,
        }
    }

    /// Asking price; `None` when the advert no longer shows one
    pub fn price(&self) -> Option<i64> {
        match self {
            Self::Unit(unit) => unit.price,
            Self::Room(room) => room.price,
        }
    }

    pub fn url(&self) -> &str {
        &self.details().url
    }

    pub fn scraper_type(&self) -> ScraperType {
        match self {
            Self::Unit(_) => ScraperType::WholeUnit,
            Self::Room(_) => ScraperType::Room,
        }
    }
}

/// Stable key of a persisted listing
pub type ListingKey = i64;

/// Dated price reading for a listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub listing_id: ListingKey,
    pub price: Option<i64>,
    pub scraped_at: DateTime<Utc>,
}

/// Persisted resume point for one scraper type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScraperProgress {
    pub scraper_type: ScraperType,
    pub last_processed_capital_id: Option<i64>,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scraper_type_parse() {
        assert_eq!("viviendas".parse::<ScraperType>().unwrap(), ScraperType::WholeUnit);
        assert_eq!("room".parse::<ScraperType>().unwrap(), ScraperType::Room);
        assert!("garajes".parse::<ScraperType>().is_err());
    }

    #[test]
    fn test_target_deserialize_from_registry_row() {
        let row = r#"{"id": 7, "province_code": "28", "capital_name": "Madrid",
                      "idealista_slug": "madrid-madrid", "is_active": false}"#;
        let target: Target = serde_json::from_str(row).unwrap();
        assert_eq!(target.slug, "madrid-madrid");
        assert_eq!(target.name, "Madrid");
        assert!(!target.is_active);
    }

    #[test]
    fn test_scraped_listing_accessors() {
        let room = ScrapedListing::Room(RoomListing {
            details: ListingDetails {
                url: "https://www.idealista.com/inmueble/1/".to_string(),
                ..Default::default()
            },
            price: None,
            available_from: Some("Disponible ya".to_string()),
        });
        assert_eq!(room.url(), "https://www.idealista.com/inmueble/1/");
        assert_eq!(room.price(), None);
        assert_eq!(room.scraper_type(), ScraperType::Room);
    }
}
