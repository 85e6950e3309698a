use std::collections::HashSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::browser::PageFetcher;
use crate::models::{identity_hash, Listing, Site};
use crate::scrapers::traits::{ScrapeError, SiteAdapter};
use crate::scrapers::types::{ScraperSettings, SearchConfig};

/// Marker that search results have rendered
const GALLERY_MARKER: &str = ".gallery-card";
/// Mandatory anchor on a listing page
const TITLE_MARKER: &str = ".postingtitletext";

static GALLERY_CARD: Lazy<Selector> = Lazy::new(|| Selector::parse(".gallery-card").unwrap());
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static POSTING_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse(".postingtitletext").unwrap());
static TITLE_TEXT: Lazy<Selector> = Lazy::new(|| Selector::parse("#titletextonly").unwrap());
static PRICE: Lazy<Selector> = Lazy::new(|| Selector::parse(".price").unwrap());
static MAP_ADDRESS: Lazy<Selector> = Lazy::new(|| Selector::parse(".mapaddress").unwrap());
static GEO_BLOCK: Lazy<Selector> = Lazy::new(|| Selector::parse("[data-latitude]").unwrap());
static TITLE_SPANS: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".postingtitletext span").unwrap());
static POSTING_BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("#postingbody").unwrap());
static SCRIPT: Lazy<Selector> = Lazy::new(|| Selector::parse("script").unwrap());
static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

/// Housing facts show up in a few different blocks depending on page vintage
static HOUSING_BLOCKS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [".attrgroup span", ".housing", "[data-housing]"]
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});

/// Image containers, multi-image gallery first
static IMAGE_CONTAINERS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [".iw.multiimage", "#thumbs", ".gallery"]
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});

static BEDROOMS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*br").unwrap());
static BATHROOMS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*ba").unwrap());
static SQFT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*ft").unwrap());

static PRINT_INFO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)<div class="print-information.*?</div>"#).unwrap());
static LINE_BREAK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<br\s*/?>|</div>|</p>").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static BLANK_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Craigslist apartment search (`/search/apa`), gallery layout
pub struct CraigslistAdapter {
    settings: ScraperSettings,
}

impl CraigslistAdapter {
    pub fn new(settings: ScraperSettings) -> Self {
        Self { settings }
    }

    /// Pull candidate listing links out of a rendered search page.
    fn collect_result_links(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        document
            .select(&GALLERY_CARD)
            .filter_map(|card| card.select(&ANCHOR).next())
            .filter_map(|anchor| anchor.value().attr("href"))
            .filter(|href| href.starts_with("http"))
            .map(|href| href.to_string())
            .collect()
    }

    /// Extract a normalized listing from a rendered posting page. None when
    /// the posting-title anchor is missing entirely.
    fn parse_listing(&self, url: &str, html: &str) -> Option<Listing> {
        let document = Html::parse_document(html);

        document.select(&POSTING_TITLE).next()?;
        let post_id = self.post_id_from_url(url)?;

        let title = document
            .select(&TITLE_TEXT)
            .next()
            .map(|el| collect_text(&el))
            .unwrap_or_default();

        let price = document
            .select(&PRICE)
            .next()
            .map(|el| parse_price(&collect_text(&el)))
            .unwrap_or(0);

        // Street address if the map block rendered, geo attributes otherwise
        let location = document
            .select(&MAP_ADDRESS)
            .next()
            .map(|el| collect_text(&el))
            .or_else(|| {
                document
                    .select(&GEO_BLOCK)
                    .next()
                    .and_then(|el| el.value().attr("data-address"))
                    .map(|s| s.to_string())
            })
            .unwrap_or_default();

        // Third span of the title block carries "(neighborhood)"
        let neighborhood = document
            .select(&TITLE_SPANS)
            .nth(2)
            .map(|el| {
                collect_text(&el)
                    .trim_matches(|c| c == '(' || c == ')')
                    .to_string()
            })
            .unwrap_or_default();

        let description = document
            .select(&POSTING_BODY)
            .next()
            .map(|el| normalize_description(&el.inner_html()))
            .unwrap_or_default();

        let (bedrooms, bathrooms, square_footage) = extract_housing_details(&document);
        let image_urls = extract_image_urls(&document);

        Some(Listing {
            hash: identity_hash(&post_id),
            post_id,
            title,
            price,
            bedrooms,
            bathrooms,
            square_footage,
            location,
            neighborhood,
            description,
            image_urls,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl SiteAdapter for CraigslistAdapter {
    fn site(&self) -> Site {
        Site::Craigslist
    }

    fn build_search_url(&self, config: &SearchConfig, page: u32) -> Result<Url, ScrapeError> {
        let mut base = String::from("https://");

        if let Some(location) = config.location.as_deref() {
            let clean = location.trim().to_lowercase();
            if !clean.is_empty() {
                // The location lands in a host position; anything beyond
                // alphanumerics could redirect the crawl to an arbitrary
                // domain.
                if !clean.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(ScrapeError::InvalidConfig(format!(
                        "invalid location {:?}: only alphanumeric characters may form a craigslist subdomain",
                        location
                    )));
                }
                base.push_str(&clean);
                base.push('.');
            }
        }
        base.push_str("craigslist.org/search/apa");

        let mut params: Vec<String> = Vec::new();
        if let Some(min_bathrooms) = config.min_bathrooms {
            params.push(format!("min_bathrooms={}", min_bathrooms as i64));
        }
        if let Some(min_bedrooms) = config.min_bedrooms {
            params.push(format!("min_bedrooms={}", min_bedrooms));
        }
        if let Some(min_price) = config.min_price {
            params.push(format!("min_price={}", min_price));
        }
        if let Some(max_price) = config.max_price {
            params.push(format!("max_price={}", max_price));
        }
        if let Some(zipcode) = config.zipcode.as_deref() {
            let digits: String = zipcode.chars().filter(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                params.push(format!("postal={}", digits));
            }
        }
        if let Some(radius) = config.search_radius_miles {
            if radius > 0.0 {
                params.push(format!("search_distance={}", radius.round() as i64));
            }
        }

        let mut rendered = base;
        if !params.is_empty() {
            rendered.push('?');
            rendered.push_str(&params.join("&"));
        }
        // Gallery pagination lives in the fragment
        rendered.push_str(&format!("#search=1~gallery~{}~0", page));

        Url::parse(&rendered)
            .map_err(|e| ScrapeError::InvalidConfig(format!("search url {:?}: {}", rendered, e)))
    }

    fn post_id_from_url(&self, url: &str) -> Option<String> {
        let last = url.trim_end_matches('/').split('/').next_back()?;
        let id = last.split('.').next().unwrap_or("");
        if id.is_empty() || id.contains('?') {
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
                .fetch_page(search_url.as_str(), GALLERY_MARKER, self.settings.element_timeout)
                .await
                .map_err(|e| ScrapeError::search_page(&search_url, e))?;

            // Past-the-end pages redirect back to an earlier canonical URL
            if !visited.insert(fetched.final_url.clone()) {
                debug!(url = %fetched.final_url, "page already visited, stopping");
                break;
            }
            if !fetched.marker_found {
                debug!(page, "gallery cards never appeared, stopping");
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
            debug!(url, "posting title never appeared, skipping listing");
            return Ok(None);
        }

        Ok(self.parse_listing(url, &page.html))
    }
}

fn collect_text(el: &scraper::ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn parse_price(text: &str) -> i64 {
    let cleaned: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    cleaned.parse().unwrap_or(0)
}

/// Bedrooms / bathrooms / square footage, each from the first block that
/// mentions it. Anything never found stays at its zero default.
fn extract_housing_details(document: &Html) -> (i64, f64, i64) {
    let mut bedrooms = 0i64;
    let mut bathrooms = 0f64;
    let mut square_footage = 0i64;

    for selector in HOUSING_BLOCKS.iter() {
        for element in document.select(selector) {
            let text = element.text().collect::<String>().to_lowercase();

            if bedrooms == 0 {
                if let Some(caps) = BEDROOMS_RE.captures(&text) {
                    bedrooms = caps[1].parse().unwrap_or(0);
                }
            }
            if bathrooms == 0.0 {
                if let Some(caps) = BATHROOMS_RE.captures(&text) {
                    bathrooms = caps[1].parse().unwrap_or(0.0);
                }
            }
            if square_footage == 0 {
                if let Some(caps) = SQFT_RE.captures(&text) {
                    square_footage = caps[1]
                        .parse::<f64>()
                        .map(|v| v.round() as i64)
                        .unwrap_or(0);
                }
            }
        }
        if bedrooms != 0 && bathrooms != 0.0 && square_footage != 0 {
            break;
        }
    }

    (bedrooms, bathrooms, square_footage)
}

/// Gallery pages embed the full-resolution image list in a script; single
/// image pages just have the img tags. Either way prefer the 1200x900
/// variant.
fn extract_image_urls(document: &Html) -> Vec<String> {
    for container_selector in IMAGE_CONTAINERS.iter() {
        let Some(container) = document.select(container_selector).next() else {
            continue;
        };

        for script in container.select(&SCRIPT) {
            let script_text = script.inner_html();
            if let Some(idx) = script_text.find("var imgList = ") {
                let json_str = script_text[idx + "var imgList = ".len()..]
                    .trim()
                    .trim_end_matches(';');
                if let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(json_str) {
                    let urls: Vec<String> = entries
                        .iter()
                        .filter_map(|entry| entry.get("url").and_then(|u| u.as_str()))
                        .map(|u| u.replace("600x450", "1200x900"))
                        .collect();
                    if !urls.is_empty() {
                        return urls;
                    }
                }
            }
        }

        let urls: Vec<String> = container
            .select(&IMG)
            .filter_map(|img| img.value().attr("src"))
            .map(|src| src.replace("600x450", "1200x900"))
            .collect();
        if !urls.is_empty() {
            return urls;
        }
    }

    Vec::new()
}

fn normalize_description(html: &str) -> String {
    let text = PRINT_INFO_RE.replace_all(html, "");
    let text = LINE_BREAK_RE.replace_all(&text, "\n");
    let text = TAG_RE.replace_all(&text, "");
    let trimmed = text.trim();
    BLANK_LINES_RE.replace_all(trimmed, "\n\n").to_string()
}
