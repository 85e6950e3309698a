use std::collections::HashSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use url::Url;

use crate::browser::PageFetcher;
use crate::models::{identity_hash, Listing, Site};
use crate::scrapers::traits::{ScrapeError, SiteAdapter};
use crate::scrapers::types::{ScraperSettings, SearchConfig};

const CARD_MARKER: &str = "[data-test=\"property-card\"]";
const TITLE_MARKER: &str = "h1";

/// Listing categories Zillow folds into one search endpoint. Everything but
/// `fr` (for rent) is switched off in the query state.
const DISABLED_CATEGORIES: [&str; 9] = [
    "fsba", "fsbo", "nc", "cmsn", "auc", "fore", "mf", "land", "manu",
];

static PROPERTY_CARD: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-test=\"property-card\"]").unwrap());
static CARD_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-test=\"property-card-link\"]").unwrap());
static ANY_ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static PRICE: Lazy<Selector> = Lazy::new(|| Selector::parse("[data-testid=\"price\"]").unwrap());
static FACT_CONTAINERS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-testid=\"bed-bath-sqft-fact-container\"]").unwrap());
static DESCRIPTION: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-testid=\"description\"]").unwrap());
static MEDIA_IMAGES: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["ul[class*=\"media-stream\"] img", "picture img"]
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});

static BEDS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*bd").unwrap());
static BATHS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*ba").unwrap());
static SQFT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\d,]+)\s*sqft").unwrap());

static BREAKS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<br\s*/?>|</div>|</p>").unwrap());
static TAGS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static EXTRA_BLANKS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Zillow rental search. Filters ride in a single `searchQueryState` query
/// parameter holding URL-encoded JSON.
pub struct ZillowAdapter {
    settings: ScraperSettings,
}

impl ZillowAdapter {
    pub fn new(settings: ScraperSettings) -> Self {
        Self { settings }
    }

    fn collect_result_links(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        document
            .select(&PROPERTY_CARD)
            .filter_map(|card| {
                card.select(&CARD_LINK)
                    .next()
                    .or_else(|| card.select(&ANY_ANCHOR).next())
            })
            .filter_map(|anchor| anchor.value().attr("href"))
            .map(|href| {
                if href.starts_with("http") {
                    href.to_string()
                } else {
                    format!("https://www.zillow.com{}", href)
                }
            })
            .collect()
    }

    fn parse_listing(&self, url: &str, html: &str) -> Option<Listing> {
        let document = Html::parse_document(html);

        let title_el = document.select(&TITLE).next()?;
        let post_id = self.post_id_from_url(url)?;

        let title = title_el.text().collect::<String>().trim().to_string();

        let price = document
            .select(&PRICE)
            .next()
            .map(|el| {
                let digits: String = el
                    .text()
                    .collect::<String>()
                    .chars()
                    .filter(|c| c.is_ascii_digit())
                    .collect();
                digits.parse().unwrap_or(0)
            })
            .unwrap_or(0);

        let description = document
            .select(&DESCRIPTION)
            .next()
            .map(|el| normalize_description(&el.inner_html()))
            .unwrap_or_default();

        let (bedrooms, bathrooms, square_footage) = extract_housing_details(&document);
        let image_urls = extract_image_urls(&document);

        Some(Listing {
            hash: identity_hash(&post_id),
            post_id,
            title: title.clone(),
            price,
            bedrooms,
            bathrooms,
            square_footage,
            // Zillow's h1 is the street address
            location: title,
            neighborhood: String::new(),
            description,
            image_urls,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl SiteAdapter for ZillowAdapter {
    fn site(&self) -> Site {
        Site::Zillow
    }

    fn build_search_url(&self, config: &SearchConfig, page: u32) -> Result<Url, ScrapeError> {
        let mut rendered = String::from("https://www.zillow.com/");
        let mut search_term: Option<String> = None;

        if let Some(location) = config.location.as_deref() {
            let clean = location.trim();
            if !clean.is_empty() {
                if !clean
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-')
                {
                    return Err(ScrapeError::InvalidConfig(format!(
                        "invalid location {:?}: zillow regions are alphanumeric words",
                        location
                    )));
                }
                rendered.push_str(&clean.to_lowercase().replace(' ', "-"));
                rendered.push('/');
                search_term = Some(clean.replace(' ', ""));
            }
        }
        rendered.push_str("rentals/");

        let mut url = Url::parse(&rendered)
            .map_err(|e| ScrapeError::InvalidConfig(format!("search url {:?}: {}", rendered, e)))?;

        let state = query_state(config, search_term.as_deref(), page);
        url.query_pairs_mut()
            .append_pair("searchQueryState", &state.to_string());

        Ok(url)
    }

    fn post_id_from_url(&self, url: &str) -> Option<String> {
        let last = url.trim_end_matches('/').split('/').next_back()?;
        let id = last.split('?').next().unwrap_or("");
        let id = id.strip_suffix("_zpid").unwrap_or(id);
        // A dot means we walked back to the hostname, not a zpid segment
        if id.is_empty() || id.contains('.') {
            None
        } else {
            Some(id.to_string())
        }
    }

    async fn list_search_result_urls(
        &self,
        fetcher: &dyn PageFetcher,
        config: &SearchConfig,
    ) -> Result<Vec<String>, ScrapeError> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut links: Vec<String> = Vec::new();
        let mut page = 0u32;

        loop {
            let search_url = self.build_search_url(config, page)?;
            debug!(page, url = %search_url, "loading search page");

            let fetched = fetcher
                .fetch_page(search_url.as_str(), CARD_MARKER, self.settings.element_timeout)
                .await
                .map_err(|e| ScrapeError::search_page(&search_url, e))?;

            if !visited.insert(fetched.final_url.clone()) {
                debug!(url = %fetched.final_url, "page already visited, stopping");
                break;
            }
            if !fetched.marker_found {
                debug!(page, "property cards never appeared, stopping");
                break;
            }

            let page_links = self.collect_result_links(&fetched.html);
            info!(page, count = page_links.len(), "collected listing links");
            links.extend(page_links);

            page += 1;
            tokio::time::sleep(self.settings.page_delay).await;
        }

        Ok(links)
    }

    async fn fetch_listing(
        &self,
        fetcher: &dyn PageFetcher,
        url: &str,
    ) -> Result<Option<Listing>, ScrapeError> {
        let page = fetcher
            .fetch_page(url, TITLE_MARKER, self.settings.element_timeout)
            .await
            .map_err(|e| ScrapeError::listing_page(url, e))?;

        if !page.marker_found {
            debug!(url, "listing heading never appeared, skipping listing");
            return Ok(None);
        }

        Ok(self.parse_listing(url, &page.html))
    }
}

/// The `searchQueryState` document. Unset bounds are pruned rather than sent
/// as nulls, matching what the site's own UI emits.
fn query_state(config: &SearchConfig, search_term: Option<&str>, page: u32) -> Value {
    let mut filter_state = Map::new();
    filter_state.insert("sort".to_string(), json!({"value": "priorityscore"}));
    filter_state.insert("fr".to_string(), json!({"value": true}));
    for category in DISABLED_CATEGORIES {
        filter_state.insert(category.to_string(), json!({"value": false}));
    }

    let mut price = Map::new();
    if let Some(min) = config.min_price {
        price.insert("min".to_string(), json!(min));
    }
    if let Some(max) = config.max_price {
        price.insert("max".to_string(), json!(max));
    }
    if !price.is_empty() {
        filter_state.insert("mp".to_string(), Value::Object(price));
    }
    if let Some(beds) = config.min_bedrooms {
        filter_state.insert("beds".to_string(), json!({"min": beds}));
    }
    if let Some(baths) = config.min_bathrooms {
        filter_state.insert("baths".to_string(), json!({"min": baths}));
    }
    if let Some(sqft) = config.min_square_feet {
        filter_state.insert("sqft".to_string(), json!({"min": sqft}));
    }

    let mut state = Map::new();
    state.insert("pagination".to_string(), json!({"currentPage": page + 1}));
    state.insert("isMapVisible".to_string(), json!(true));
    state.insert("isListVisible".to_string(), json!(true));
    state.insert("mapZoom".to_string(), json!(12));
    state.insert("filterState".to_string(), Value::Object(filter_state));
    if let Some(term) = search_term {
        state.insert("usersSearchTerm".to_string(), json!(term));
    }

    Value::Object(state)
}

fn extract_housing_details(document: &Html) -> (i64, f64, i64) {
    let mut bedrooms = 0i64;
    let mut bathrooms = 0f64;
    let mut square_footage = 0i64;

    for element in document.select(&FACT_CONTAINERS) {
        let text = element.text().collect::<String>().to_lowercase();

        if bedrooms == 0 {
            if let Some(caps) = BEDS_RE.captures(&text) {
                bedrooms = caps[1].parse().unwrap_or(0);
            }
        }
        if bathrooms == 0.0 {
            if let Some(caps) = BATHS_RE.captures(&text) {
                bathrooms = caps[1].parse().unwrap_or(0.0);
            }
        }
        if square_footage == 0 {
            if let Some(caps) = SQFT_RE.captures(&text) {
                square_footage = caps[1].replace(',', "").parse().unwrap_or(0);
            }
        }

        if bedrooms != 0 && bathrooms != 0.0 && square_footage != 0 {
            break;
        }
    }

    (bedrooms, bathrooms, square_footage)
}

fn extract_image_urls(document: &Html) -> Vec<String> {
    for selector in MEDIA_IMAGES.iter() {
        let mut seen = HashSet::new();
        let urls: Vec<String> = document
            .select(selector)
            .filter_map(|img| img.value().attr("src"))
            .filter(|src| src.starts_with("http"))
            .filter(|src| seen.insert(src.to_string()))
            .map(str::to_string)
            .collect();
        if !urls.is_empty() {
            return urls;
        }
    }
    Vec::new()
}

fn normalize_description(html: &str) -> String {
    let text = BREAKS_RE.replace_all(html, "\n");
    let text = TAGS_RE.replace_all(&text, "");
    let trimmed = text.trim();
    EXTRA_BLANKS_RE.replace_all(trimmed, "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{rendered_without_marker, ScriptedFetcher};
    use std::time::Duration;

    fn adapter() -> ZillowAdapter {
        ZillowAdapter::new(ScraperSettings {
            page_delay: Duration::ZERO,
            element_timeout: Duration::from_secs(1),
        })
    }

    fn full_config() -> SearchConfig {
        SearchConfig {
            template_id: 3,
            min_price: Some(1500),
            max_price: Some(3000),
            min_bedrooms: Some(3),
            min_bathrooms: Some(2.0),
            min_square_feet: Some(1100),
            location: Some("San Francisco CA".to_string()),
            zipcode: None,
            search_radius_miles: None,
            max_listings_to_scrape: None,
        }
    }

    fn decoded_state(url: &Url) -> Value {
        let raw = url
            .query_pairs()
            .find(|(k, _)| k == "searchQueryState")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    const LISTING_PAGE: &str = r#"<html><body>
      <h1>665 Brittany Ln, Hayward, CA 94541</h1>
      <span data-testid="price">$2,950/mo</span>
      <div data-testid="bed-bath-sqft-fact-container"><span>3</span><span>bd</span></div>
      <div data-testid="bed-bath-sqft-fact-container"><span>2</span><span>ba</span></div>
      <div data-testid="bed-bath-sqft-fact-container"><span>1,250</span><span>sqft</span></div>
      <ul class="media-stream-grid">
        <li><picture><img src="https://photos.zillowstatic.invalid/fp/a1.jpg"></picture></li>
        <li><picture><img src="https://photos.zillowstatic.invalid/fp/a2.jpg"></picture></li>
        <li><picture><img src="https://photos.zillowstatic.invalid/fp/a1.jpg"></picture></li>
      </ul>
      <div data-testid="description">Sunny three bedroom.<br>Garage parking.</div>
    </body></html>"#;

    #[test]
    fn search_url_carries_region_path_and_query_state() {
        let url = adapter().build_search_url(&full_config(), 0).unwrap();
        assert!(url
            .as_str()
            .starts_with("https://www.zillow.com/san-francisco-ca/rentals/?searchQueryState="));

        let state = decoded_state(&url);
        assert_eq!(state["pagination"]["currentPage"], json!(1));
        assert_eq!(state["usersSearchTerm"], json!("SanFranciscoCA"));
        assert_eq!(state["filterState"]["fr"]["value"], json!(true));
        assert_eq!(state["filterState"]["fsba"]["value"], json!(false));
        assert_eq!(state["filterState"]["mp"], json!({"min": 1500, "max": 3000}));
        assert_eq!(state["filterState"]["beds"], json!({"min": 3}));
        assert_eq!(state["filterState"]["baths"], json!({"min": 2.0}));
        assert_eq!(state["filterState"]["sqft"], json!({"min": 1100}));
    }

    #[test]
    fn unset_bounds_are_pruned_from_query_state() {
        let mut config = full_config();
        config.min_price = None;
        config.max_price = None;
        config.min_square_feet = None;

        let state = decoded_state(&adapter().build_search_url(&config, 0).unwrap());
        assert!(state["filterState"].get("mp").is_none());
        assert!(state["filterState"].get("sqft").is_none());
        assert_eq!(state["filterState"]["beds"], json!({"min": 3}));
    }

    #[test]
    fn page_number_is_one_based_in_query_state() {
        let state = decoded_state(&adapter().build_search_url(&full_config(), 4).unwrap());
        assert_eq!(state["pagination"]["currentPage"], json!(5));
    }

    #[test]
    fn rejects_location_with_unsafe_characters() {
        let mut config = full_config();
        config.location = Some("oakland\" onload=".to_string());
        let err = adapter().build_search_url(&config, 0).unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidConfig(_)));
    }

    #[test]
    fn post_id_strips_zpid_suffix() {
        let adapter = adapter();
        assert_eq!(
            adapter.post_id_from_url(
                "https://www.zillow.com/homedetails/665-Brittany-Ln-Hayward-CA-94541/19501209_zpid/"
            ),
            Some("19501209".to_string())
        );
        assert_eq!(adapter.post_id_from_url("https://www.zillow.com/"), None);
    }

    #[test]
    fn parses_full_listing_page() {
        let url = "https://www.zillow.com/homedetails/665-Brittany-Ln/19501209_zpid/";
        let listing = adapter().parse_listing(url, LISTING_PAGE).unwrap();

        assert_eq!(listing.title, "665 Brittany Ln, Hayward, CA 94541");
        assert_eq!(listing.location, "665 Brittany Ln, Hayward, CA 94541");
        assert_eq!(listing.post_id, "19501209");
        assert_eq!(listing.price, 2950);
        assert_eq!(listing.bedrooms, 3);
        assert_eq!(listing.bathrooms, 2.0);
        assert_eq!(listing.square_footage, 1250);
        assert_eq!(
            listing.image_urls,
            vec![
                "https://photos.zillowstatic.invalid/fp/a1.jpg",
                "https://photos.zillowstatic.invalid/fp/a2.jpg"
            ]
        );
        assert_eq!(listing.description, "Sunny three bedroom.\nGarage parking.");
    }

    #[test]
    fn missing_facts_fall_back_to_zero_values() {
        let page = r#"<html><body><h1>665 Brittany Ln</h1></body></html>"#;
        let listing = adapter()
            .parse_listing("https://www.zillow.com/homedetails/x/1_zpid/", page)
            .unwrap();
        assert_eq!(listing.price, 0);
        assert_eq!(listing.bedrooms, 0);
        assert_eq!(listing.bathrooms, 0.0);
        assert_eq!(listing.square_footage, 0);
        assert!(listing.image_urls.is_empty());
    }

    #[tokio::test]
    async fn pagination_stops_when_cards_never_appear() {
        let adapter = adapter();
        let config = full_config();
        let page1 = adapter.build_search_url(&config, 0).unwrap().to_string();

        let fetcher =
            ScriptedFetcher::new().page(&page1, rendered_without_marker(&page1, "<html></html>"));

        let links = adapter
            .list_search_result_urls(&fetcher, &config)
            .await
            .unwrap();
        assert!(links.is_empty());
    }
}
