use crate::error::{Result, ScrapeError};
use crate::models::{ListingDetails, RoomListing, ScrapedListing, ScraperType, UnitListing};
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};
use url::Url;

/// Markers of a listing index page, with or without results
const LAYOUT_MARKERS: &str = "main.listing-items, section.items-container, .zero-results";

const FLOOR_WORDS: [&str; 6] = ["planta", "bajo", "exterior", "interior", "sótano", "ático"];
const MONTHS: [&str; 12] = [
    "enero", "febrero", "marzo", "abril", "mayo", "junio", "julio", "agosto", "septiembre",
    "octubre", "noviembre", "diciembre",
];

/// Listings extracted from one index page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub listings: Vec<ScrapedListing>,
    /// `Some(false)` when the page has pagination controls without a next
    /// link; `None` when it has no pagination controls at all
    pub has_next_page: Option<bool>,
}

/// Markers of a listing detail page
const DETAIL_MARKERS: &str = ".main-info__title-main, .info-data-price, .details-property";

/// Fields read from a listing's own page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailPage {
    pub url: String,
    pub title: Option<String>,
    pub location: Option<String>,
    pub price: Option<i64>,
    pub description: Option<String>,
    /// "Anuncio actualizado el ..." line, verbatim
    pub updated: Option<String>,
    /// Feature block heading -> its items
    pub features: BTreeMap<String, Vec<String>>,
    pub num_bedrooms: Option<i64>,
    pub size_sqm: Option<i64>,
    pub floor: Option<String>,
}

impl DetailPage {
    /// Copy detail fields into `details` where the index card had none.
    /// Fields already set are left alone.
    pub fn fill_missing(&self, details: &mut ListingDetails) {
        if details.title.is_none() {
            details.title = self.title.clone();
        }
        if details.location.is_none() {
            details.location = self.location.clone();
        }
        if details.description.is_none() {
            details.description = self.description.clone();
        }
        details.size_sqm = details.size_sqm.or(self.size_sqm);
        details.num_bedrooms = details.num_bedrooms.or(self.num_bedrooms);
        if details.flat_floor_number.is_none() {
            details.flat_floor_number = self.floor.clone();
        }
    }
}

/// Parser for Idealista listing index and detail pages. Pure: markup in,
/// records out.
pub struct IdealistaParser {
    layout: Selector,
    article: Selector,
    link: Selector,
    price: Selector,
    pricedown: Selector,
    detail: Selector,
    description: Selector,
    branding: Selector,
    branding_img: Selector,
    pagination: Selector,
    next_link: Selector,
    detail_layout: Selector,
    detail_title: Selector,
    detail_location: Selector,
    detail_price: Selector,
    detail_comment: Selector,
    detail_stats: Selector,
    feature_heading: Selector,
    feature_item: Selector,
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector '{}': {:?}", css, e))
}

impl IdealistaParser {
    pub fn new() -> Self {
        Self {
            layout: selector(LAYOUT_MARKERS),
            article: selector("article.item"),
            link: selector("a.item-link"),
            price: selector("span.item-price"),
            pricedown: selector("span.pricedown_price"),
            detail: selector("div.item-detail-char span.item-detail"),
            description: selector("div.item-description"),
            branding: selector("picture.logo-branding"),
            branding_img: selector("img"),
            pagination: selector("div.pagination"),
            next_link: selector("li.next a"),
            detail_layout: selector(DETAIL_MARKERS),
            detail_title: selector(".main-info__title-main"),
            detail_location: selector(".main-info__title-minor"),
            detail_price: selector(".info-data-price span"),
            detail_comment: selector("div.comment"),
            detail_stats: selector("p.stats-text"),
            feature_heading: selector(".details-property-h2"),
            feature_item: selector("li"),
        }
    }

    /// Extract every listing on the page. Fails only when the page does not
    /// look like a listing index at all (layout change or challenge page).
    pub fn parse_page(
        &self,
        html: &str,
        page_url: &str,
        scraper_type: ScraperType,
    ) -> Result<ParsedPage> {
        let document = Html::parse_document(html);

        if document.select(&self.layout).next().is_none() {
            return Err(ScrapeError::Parse(format!(
                "no listing container on {}",
                page_url
            )));
        }

        let base = Url::parse(page_url).ok();
        let mut seen = HashSet::new();
        let mut listings = Vec::new();

        for (idx, article) in document.select(&self.article).enumerate() {
            let Some(listing) = self.parse_article(article, base.as_ref(), scraper_type) else {
                debug!("Skipped article {} without a listing link", idx);
                continue;
            };
            if !seen.insert(listing.url().to_string()) {
                debug!("Duplicate listing on page: {}", listing.url());
                continue;
            }
            listings.push(listing);
        }

        let has_next_page = document
            .select(&self.pagination)
            .next()
            .map(|pagination| pagination.select(&self.next_link).next().is_some());

        info!("Extracted {} listings from {}", listings.len(), page_url);
        Ok(ParsedPage {
            listings,
            has_next_page,
        })
    }

    /// Extract a listing's own page. Fails when the page carries none of
    /// the detail layout markers.
    pub fn parse_detail(&self, html: &str, url: &str) -> Result<DetailPage> {
        let document = Html::parse_document(html);
        if document.select(&self.detail_layout).next().is_none() {
            return Err(ScrapeError::Parse(format!("no listing detail on {}", url)));
        }

        let first_text = |sel: &Selector| {
            document
                .select(sel)
                .next()
                .and_then(|el| non_empty(collapse_whitespace(&text_of(el))))
        };

        let mut page = DetailPage {
            url: url.to_string(),
            title: first_text(&self.detail_title),
            location: first_text(&self.detail_location),
            price: document
                .select(&self.detail_price)
                .next()
                .and_then(|el| parse_number(&text_of(el))),
            description: first_text(&self.detail_comment),
            updated: document
                .select(&self.detail_stats)
                .map(|el| collapse_whitespace(&text_of(el)))
                .find(|text| {
                    let lower = text.to_lowercase();
                    lower.contains("actualizado") || lower.contains("updated on")
                }),
            ..Default::default()
        };

        for heading in document.select(&self.feature_heading) {
            let label = collapse_whitespace(&text_of(heading));
            if label.is_empty() {
                continue;
            }
            // Items live in the first element sibling after the heading
            let items: Vec<String> = heading
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .next()
                .map(|block| {
                    block
                        .select(&self.feature_item)
                        .map(|li| collapse_whitespace(&text_of(li)))
                        .filter(|text| !text.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            page.features.insert(label, items);
        }

        for feature in page.features.values().flatten() {
            let lower = feature.to_lowercase();
            if lower.contains("habitaci") {
                page.num_bedrooms = page.num_bedrooms.or_else(|| parse_number(feature));
            } else if let Some((before, _)) = feature.split_once("m²") {
                page.size_sqm = page.size_sqm.or_else(|| parse_number(before));
            } else if lower.starts_with("planta") || lower.starts_with("bajo") {
                page.floor.get_or_insert_with(|| feature.clone());
            }
        }

        debug!(
            "Detail {}: {} feature blocks, updated {:?}",
            url,
            page.features.len(),
            page.updated
        );
        Ok(page)
    }

    fn parse_article(
        &self,
        article: ElementRef<'_>,
        base: Option<&Url>,
        scraper_type: ScraperType,
    ) -> Option<ScrapedListing> {
        let link = article.select(&self.link).next()?;
        let href = link.value().attr("href")?.trim();
        if href.is_empty() {
            return None;
        }
        let url = match base.and_then(|b| b.join(href).ok()) {
            Some(joined) => joined.to_string(),
            None => href.to_string(),
        };

        let title = non_empty(collapse_whitespace(&text_of(link)));
        let title_attr = link
            .value()
            .attr("title")
            .map(str::to_string)
            .or_else(|| title.clone())
            .unwrap_or_default();

        let mut details = ListingDetails {
            url,
            location: location_from_title(&title_attr),
            property_type: property_type_from_title(&title_attr),
            title,
            ..Default::default()
        };

        let price = article
            .select(&self.price)
            .next()
            .and_then(|el| parse_number(&text_of(el)));
        details.pricedown_price = article
            .select(&self.pricedown)
            .next()
            .and_then(|el| parse_number(&text_of(el)));

        let mut available_from = None;
        for detail in article.select(&self.detail) {
            let text = collapse_whitespace(&text_of(detail));
            let lower = text.to_lowercase();
            if lower.contains("m²") && !lower.contains("€/m²") {
                details.size_sqm = details.size_sqm.or_else(|| parse_number(&text));
            } else if lower.contains("hab.") {
                details.num_bedrooms = details.num_bedrooms.or_else(|| parse_number(&text));
            } else if FLOOR_WORDS.iter().any(|w| lower.contains(w)) {
                details.flat_floor_number.get_or_insert(text);
            } else if scraper_type == ScraperType::Room && is_availability(&lower) {
                available_from.get_or_insert(text);
            }
        }

        details.description = article
            .select(&self.description)
            .next()
            .and_then(|el| non_empty(collapse_whitespace(&text_of(el))));

        match article.select(&self.branding).next() {
            Some(branding) => {
                details.advertiser_type = Some("company".to_string());
                details.advertiser_name = branding
                    .select(&self.branding_img)
                    .next()
                    .and_then(|img| img.value().attr("alt"))
                    .and_then(|alt| non_empty(alt.trim().to_string()));
            }
            None => details.advertiser_type = Some("individual".to_string()),
        }

        Some(match scraper_type {
            ScraperType::WholeUnit => ScrapedListing::Unit(UnitListing { details, price }),
            ScraperType::Room => ScrapedListing::Room(RoomListing {
                details,
                price,
                available_from,
            }),
        })
    }
}

impl Default for IdealistaParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Integer value of Spanish-formatted numeric text ("1.250 €/mes",
/// "85,5 m²"). The decimal part is dropped; anything without digits, or too
/// large for an i64, yields `None`.
pub fn parse_number(text: &str) -> Option<i64> {
    let integral = text.split(',').next().unwrap_or_default();
    let digits: String = integral.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Text after the last " en " (or " in "):
/// "Habitación en piso compartido en Lavapiés" -> "Lavapiés"
fn location_from_title(title: &str) -> Option<String> {
    [" en ", " in "]
        .iter()
        .find_map(|sep| title.rsplit_once(sep).map(|(_, rest)| rest.trim().to_string()))
        .and_then(non_empty)
}

/// "Piso en calle de Alcalá" -> "Piso"
fn property_type_from_title(title: &str) -> Option<String> {
    let (head, _) = title.split_once(" en ").or_else(|| title.split_once(" in "))?;
    non_empty(head.trim().to_string())
}

fn is_availability(lower: &str) -> bool {
    lower.contains("disponible")
        || lower
            .split(|c: char| !c.is_alphabetic())
            .any(|word| word.chars().count() >= 3 && MONTHS.iter().any(|m| m.starts_with(word)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_URL: &str = "https://www.idealista.com/alquiler-viviendas/madrid-madrid/";

    fn page(articles: &str, pagination: &str) -> String {
        format!(
            r#"<html><body><main class="listing-items">
               <section class="items-container">{}</section>{}</main></body></html>"#,
            articles, pagination
        )
    }

    const FULL_ARTICLE: &str = r#"
        <article class="item" data-element-id="101">
          <picture class="logo-branding"><img alt=" Inmobiliaria Sol " src="x.png"></picture>
          <div class="item-info-container">
            <a href="/inmueble/101/" class="item-link" title="Piso en calle de Alcalá, Salamanca, Madrid">
              Piso en calle de Alcalá, Salamanca
            </a>
            <div class="price-row">
              <span class="item-price h2-simulated">1.250<span class="txt-big">€/mes</span></span>
              <span class="pricedown"><span class="pricedown_price">1.400 €</span></span>
            </div>
            <div class="item-detail-char">
              <span class="item-detail">3 <small>hab.</small></span>
              <span class="item-detail">85,5 <small>m²</small></span>
              <span class="item-detail">Planta 2ª exterior con ascensor</span>
            </div>
            <div class="item-description description">
              <p class="ellipsis">Luminoso   piso
                 reformado</p>
            </div>
          </div>
        </article>"#;

    #[test]
    fn test_parse_full_listing() {
        let parser = IdealistaParser::new();
        let parsed = parser
            .parse_page(&page(FULL_ARTICLE, ""), PAGE_URL, ScraperType::WholeUnit)
            .unwrap();

        assert_eq!(parsed.listings.len(), 1);
        let ScrapedListing::Unit(unit) = &parsed.listings[0] else {
            panic!("expected a whole-unit listing");
        };
        assert_eq!(unit.price, Some(1250));
        let d = &unit.details;
        assert_eq!(d.url, "https://www.idealista.com/inmueble/101/");
        assert_eq!(d.title.as_deref(), Some("Piso en calle de Alcalá, Salamanca"));
        assert_eq!(d.location.as_deref(), Some("calle de Alcalá, Salamanca, Madrid"));
        assert_eq!(d.property_type.as_deref(), Some("Piso"));
        assert_eq!(d.size_sqm, Some(85));
        assert_eq!(d.num_bedrooms, Some(3));
        assert_eq!(d.flat_floor_number.as_deref(), Some("Planta 2ª exterior con ascensor"));
        assert_eq!(d.pricedown_price, Some(1400));
        assert_eq!(d.description.as_deref(), Some("Luminoso piso reformado"));
        assert_eq!(d.advertiser_type.as_deref(), Some("company"));
        assert_eq!(d.advertiser_name.as_deref(), Some("Inmobiliaria Sol"));
        assert_eq!(parsed.has_next_page, None);
    }

    #[test]
    fn test_missing_price_and_optional_fields_yield_nulls() {
        let article = r#"
            <article class="item">
              <a href="/inmueble/202/" class="item-link" title="Estudio en Centro">Estudio en Centro</a>
              <span class="item-price">A consultar</span>
            </article>"#;
        let parsed = IdealistaParser::new()
            .parse_page(&page(article, ""), PAGE_URL, ScraperType::WholeUnit)
            .unwrap();

        let listing = &parsed.listings[0];
        assert_eq!(listing.price(), None);
        let d = listing.details();
        assert_eq!(d.size_sqm, None);
        assert_eq!(d.flat_floor_number, None);
        assert_eq!(d.description, None);
        assert_eq!(d.advertiser_type.as_deref(), Some("individual"));
        assert_eq!(d.advertiser_name, None);
    }

    #[test]
    fn test_room_availability_and_dedup() {
        let article = r#"
            <article class="item">
              <a href="/inmueble/303/" class="item-link" title="Habitación en piso compartido en Lavapiés">Habitación</a>
              <span class="item-price">450€/mes</span>
              <div class="item-detail-char">
                <span class="item-detail">4 hab.</span>
                <span class="item-detail">Disponible desde 1 sep</span>
              </div>
            </article>"#;
        let twice = format!("{}{}", article, article);
        let parsed = IdealistaParser::new()
            .parse_page(&page(&twice, ""), PAGE_URL, ScraperType::Room)
            .unwrap();

        assert_eq!(parsed.listings.len(), 1);
        let ScrapedListing::Room(room) = &parsed.listings[0] else {
            panic!("expected a room listing");
        };
        assert_eq!(room.price, Some(450));
        assert_eq!(room.details.num_bedrooms, Some(4));
        assert_eq!(room.available_from.as_deref(), Some("Disponible desde 1 sep"));
        assert_eq!(room.details.property_type.as_deref(), Some("Habitación"));
        assert_eq!(room.details.location.as_deref(), Some("Lavapiés"));
    }

    #[test]
    fn test_location_is_last_title_segment() {
        assert_eq!(
            location_from_title("Habitación en piso compartido en Lavapiés").as_deref(),
            Some("Lavapiés")
        );
        assert_eq!(
            location_from_title("Piso en calle de Alcalá, Salamanca, Madrid").as_deref(),
            Some("calle de Alcalá, Salamanca, Madrid")
        );
        assert_eq!(location_from_title("Ático in Chamberí").as_deref(), Some("Chamberí"));
        assert_eq!(location_from_title("Estudio"), None);
    }

    #[test]
    fn test_article_without_link_is_skipped() {
        let articles = format!(
            r#"<article class="item adv"><span class="item-price">999</span></article>{}"#,
            FULL_ARTICLE
        );
        let parsed = IdealistaParser::new()
            .parse_page(&page(&articles, ""), PAGE_URL, ScraperType::WholeUnit)
            .unwrap();
        assert_eq!(parsed.listings.len(), 1);
    }

    #[test]
    fn test_empty_results_page() {
        let html = r#"<html><body><div class="zero-results">No hay anuncios</div></body></html>"#;
        let parsed = IdealistaParser::new()
            .parse_page(html, PAGE_URL, ScraperType::WholeUnit)
            .unwrap();
        assert!(parsed.listings.is_empty());
    }

    #[test]
    fn test_missing_layout_is_parse_failure() {
        let html = "<html><body><h1>Please verify you are a human</h1></body></html>";
        let result = IdealistaParser::new().parse_page(html, PAGE_URL, ScraperType::WholeUnit);
        assert!(matches!(result, Err(ScrapeError::Parse(_))));
    }

    #[test]
    fn test_pagination_detection() {
        let parser = IdealistaParser::new();
        let with_next = page(
            FULL_ARTICLE,
            r#"<div class="pagination"><ul><li class="selected"><span>1</span></li>
               <li class="next"><a href="pagina-2.htm">Siguiente</a></li></ul></div>"#,
        );
        let last = page(
            FULL_ARTICLE,
            r#"<div class="pagination"><ul><li><a href="pagina-1.htm">1</a></li>
               <li class="selected"><span>2</span></li></ul></div>"#,
        );
        let next = parser.parse_page(&with_next, PAGE_URL, ScraperType::WholeUnit).unwrap();
        let end = parser.parse_page(&last, PAGE_URL, ScraperType::WholeUnit).unwrap();
        assert_eq!(next.has_next_page, Some(true));
        assert_eq!(end.has_next_page, Some(false));
    }

    const DETAIL_PAGE: &str = r#"<html><body>
        <main class="detail-container">
          <h1><span class="main-info__title-main">Piso en venta en calle de Toledo</span></h1>
          <span class="main-info__title-minor">La Latina, Madrid</span>
          <div class="info-data"><span class="info-data-price"><span class="txt-bold">1.350</span>€/mes</span></div>
          <div class="comment"><div class="adCommentsLanguage"><p>Piso luminoso,
             reformado en 2021.</p></div></div>
          <p class="stats-text">Anuncio actualizado el 3 de junio</p>
          <section class="details-property">
            <h2 class="details-property-h2">Características básicas</h2>
            <div class="details-property_features">
              <ul>
                <li>85 m² construidos, 70 m² útiles</li>
                <li>3 habitaciones</li>
                <li>2 baños</li>
              </ul>
            </div>
            <h2 class="details-property-h2">Edificio</h2>
            <div class="details-property_features">
              <ul><li>Planta 4ª exterior</li><li>Con ascensor</li></ul>
            </div>
          </section>
        </main></body></html>"#;

    #[test]
    fn test_detail_page() {
        let detail = IdealistaParser::new()
            .parse_detail(DETAIL_PAGE, "https://www.idealista.com/inmueble/101/")
            .unwrap();

        assert_eq!(detail.title.as_deref(), Some("Piso en venta en calle de Toledo"));
        assert_eq!(detail.location.as_deref(), Some("La Latina, Madrid"));
        assert_eq!(detail.price, Some(1350));
        assert_eq!(
            detail.description.as_deref(),
            Some("Piso luminoso, reformado en 2021.")
        );
        assert_eq!(detail.updated.as_deref(), Some("Anuncio actualizado el 3 de junio"));
        assert_eq!(detail.features.len(), 2);
        assert_eq!(detail.features["Edificio"], vec!["Planta 4ª exterior", "Con ascensor"]);
        assert_eq!(detail.size_sqm, Some(85));
        assert_eq!(detail.num_bedrooms, Some(3));
        assert_eq!(detail.floor.as_deref(), Some("Planta 4ª exterior"));
    }

    #[test]
    fn test_detail_fills_only_missing_fields() {
        let detail = IdealistaParser::new()
            .parse_detail(DETAIL_PAGE, "https://www.idealista.com/inmueble/101/")
            .unwrap();
        let mut details = ListingDetails {
            url: "https://www.idealista.com/inmueble/101/".to_string(),
            location: Some("calle de Toledo".to_string()),
            num_bedrooms: Some(2),
            ..Default::default()
        };

        detail.fill_missing(&mut details);

        assert_eq!(details.location.as_deref(), Some("calle de Toledo"));
        assert_eq!(details.num_bedrooms, Some(2));
        assert_eq!(details.size_sqm, Some(85));
        assert_eq!(details.flat_floor_number.as_deref(), Some("Planta 4ª exterior"));
        assert!(details.description.is_some());
        assert!(!details.has_gaps());
    }

    #[test]
    fn test_detail_without_markers_is_parse_failure() {
        let result = IdealistaParser::new().parse_detail(
            "<html><body><p>Pardon</p></body></html>",
            "https://www.idealista.com/inmueble/1/",
        );
        assert!(matches!(result, Err(ScrapeError::Parse(_))));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("1.250 €/mes"), Some(1250));
        assert_eq!(parse_number("85,5 m²"), Some(85));
        assert_eq!(parse_number("m²"), None);
        assert_eq!(parse_number("A consultar"), None);
        assert_eq!(parse_number("99999999999999999999999"), None);
    }
}
