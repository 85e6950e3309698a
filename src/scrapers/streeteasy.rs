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

const CARD_MARKER: &str = "[data-testid=\"listing-card\"]";
const INFO_MARKER: &str = "[data-testid=\"home-info-section\"]";

static LISTING_CARD: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-testid=\"listing-card\"]").unwrap());
static CARD_ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static INFO_SECTION: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-testid=\"home-info-section\"]").unwrap());
static INFO_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-testid=\"home-info-section\"] h1").unwrap());
static PRICE_BLOCK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[class*=\"PriceInfo_price\"]").unwrap());
static ADDRESS_BLOCK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[class*=\"AboutBuildingSection_address\"]").unwrap());
static AREA_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-testid=\"area-link\"]").unwrap());
static ABOUT_SECTION: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-testid=\"about-section\"]").unwrap());
static BODY_BLOCKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[class*=\"Body_base\"]").unwrap());

/// Carousel first, thumbnail strip as the fallback
static IMAGE_WRAPPERS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "[class*=\"MediaCarousel_mediaCarouselImageWrapper\"]",
        "[class*=\"MediaCarousel_thumbsContainer\"]",
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect()
});
static PHOTO_IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img[alt^=\"photo\"]").unwrap());

static BEDS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*bed").unwrap());
static BATHS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*bath").unwrap());
static SQFT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*ft²").unwrap());

static BREAKS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<br\s*/?>|</div>|</p>").unwrap());
static TAGS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static EXTRA_BLANKS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

/// StreetEasy rental search, `for-rent` path grammar with `|`-joined filters
pub struct StreeteasyAdapter {
    settings: ScraperSettings,
}

impl StreeteasyAdapter {
    pub fn new(settings: ScraperSettings) -> Self {
        Self { settings }
    }

    fn collect_result_links(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        document
            .select(&LISTING_CARD)
            .filter_map(|card| card.select(&CARD_ANCHOR).next())
            .filter_map(|anchor| anchor.value().attr("href"))
            .map(|href| {
                if href.starts_with("http") {
                    href.to_string()
                } else {
                    format!("https://streeteasy.com{}", href)
                }
            })
            .collect()
    }

    fn parse_listing(&self, url: &str, html: &str) -> Option<Listing> {
        let document = Html::parse_document(html);

        document.select(&INFO_SECTION).next()?;
        let post_id = self.post_id_from_url(url)?;

        let title = document
            .select(&INFO_TITLE)
            .next()
            .or_else(|| document.select(&INFO_SECTION).next())
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let price = document
            .select(&PRICE_BLOCK)
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

        let location = document
            .select(&ADDRESS_BLOCK)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let neighborhood = document
            .select(&AREA_LINK)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let description = document
            .select(&ABOUT_SECTION)
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
impl SiteAdapter for StreeteasyAdapter {
    fn site(&self) -> Site {
        Site::Streeteasy
    }

    fn build_search_url(&self, config: &SearchConfig, page: u32) -> Result<Url, ScrapeError> {
        let mut rendered = String::from("https://streeteasy.com/for-rent");

        if let Some(location) = config.location.as_deref() {
            let clean = location.trim().to_lowercase();
            if !clean.is_empty() {
                // Area tokens allow spaces (rendered as dashes) but nothing else
                if !clean
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-')
                {
                    return Err(ScrapeError::InvalidConfig(format!(
                        "invalid location {:?}: streeteasy areas are alphanumeric words",
                        location
                    )));
                }
                rendered.push('/');
                rendered.push_str(&clean.replace(' ', "-"));
            }
        }

        let mut filters: Vec<String> = Vec::new();
        match (config.min_price, config.max_price) {
            (Some(min), Some(max)) => filters.push(format!("price:{}-{}", min, max)),
            (Some(min), None) => filters.push(format!("price:{}-", min)),
            (None, Some(max)) => filters.push(format!("price:-{}", max)),
            (None, None) => {}
        }
        if let Some(sqft) = config.min_square_feet {
            filters.push(format!("sqft>={}", sqft));
        }
        if let Some(zipcode) = config.zipcode.as_deref() {
            let digits: String = zipcode.chars().filter(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                filters.push(format!("zip:{}", digits));
            }
        }
        if let Some(beds) = config.min_bedrooms {
            filters.push(format!("beds:{}", beds));
        }
        if let Some(baths) = config.min_bathrooms {
            filters.push(format!("baths>={}", baths as i64));
        }

        if !filters.is_empty() {
            rendered.push('/');
            // StreetEasy separates stacked filters with an encoded pipe
            rendered.push_str(&filters.join("%7C"));
        }

        // se_score keeps the ordering stable between pages
        rendered.push_str(&format!("?sort_by=se_score&page={}", page + 1));

        Url::parse(&rendered)
            .map_err(|e| ScrapeError::InvalidConfig(format!("search url {:?}: {}", rendered, e)))
    }

    fn post_id_from_url(&self, url: &str) -> Option<String> {
        let last = url.trim_end_matches('/').split('/').next_back()?;
        let id = last.split('.').next().unwrap_or("").split('?').next().unwrap_or("");
        if id.is_empty() {
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
                debug!(page, "listing cards never appeared, stopping");
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
            .fetch_page(url, INFO_MARKER, self.settings.element_timeout)
            .await
            .map_err(|e| ScrapeError::listing_page(url, e))?;

        if !page.marker_found {
            debug!(url, "home info section never appeared, skipping listing");
            return Ok(None);
        }

        Ok(self.parse_listing(url, &page.html))
    }
}

/// Bed/bath/sqft from the body text blocks. Ranged "500-700 ft²" building
/// summaries are skipped; only a concrete unit figure counts.
fn extract_housing_details(document: &Html) -> (i64, f64, i64) {
    let mut bedrooms = 0i64;
    let mut bathrooms = 0f64;
    let mut square_footage = 0i64;

    for element in document.select(&BODY_BLOCKS) {
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
        if square_footage == 0 && !text.contains('-') {
            if let Some(caps) = SQFT_RE.captures(&text) {
                square_footage = caps[1]
                    .parse::<f64>()
                    .map(|v| v.round() as i64)
                    .unwrap_or(0);
            }
        }

        if bedrooms != 0 && bathrooms != 0.0 && square_footage != 0 {
            break;
        }
    }

    (bedrooms, bathrooms, square_footage)
}

fn extract_image_urls(document: &Html) -> Vec<String> {
    for wrapper in IMAGE_WRAPPERS.iter() {
        let urls: Vec<String> = document
            .select(wrapper)
            .flat_map(|container| container.select(&PHOTO_IMG))
            .filter_map(|img| img.value().attr("src"))
            .map(|src| src.replace("800_400", "1200_800"))
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
