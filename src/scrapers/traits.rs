use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::browser::{BrowserError, PageFetcher};
use crate::models::{Listing, Site};
use crate::scrapers::types::SearchConfig;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// A search-configuration field failed validation; nothing was fetched
    #[error("invalid search config: {0}")]
    InvalidConfig(String),
    /// The search results page itself would not load; fatal to the run
    #[error("search page {url} failed to load")]
    SearchPage {
        url: String,
        #[source]
        source: BrowserError,
    },
    /// One listing page would not load; that URL is skipped
    #[error("listing page {url} failed to load")]
    ListingPage {
        url: String,
        #[source]
        source: BrowserError,
    },
    /// The shared browser session is gone; fatal to the run
    #[error(transparent)]
    Session(#[from] BrowserError),
}

impl ScrapeError {
    /// Classify a failed search-page load. A session outage keeps its own
    /// identity so callers treat it as fatal in its own right.
    pub(crate) fn search_page(url: &Url, source: BrowserError) -> Self {
        match source {
            BrowserError::SessionUnavailable { .. } => ScrapeError::Session(source),
            other => ScrapeError::SearchPage {
                url: url.to_string(),
                source: other,
            },
        }
    }

    /// Classify a failed listing-page load the same way.
    pub(crate) fn listing_page(url: &str, source: BrowserError) -> Self {
        match source {
            BrowserError::SessionUnavailable { .. } => ScrapeError::Session(source),
            other => ScrapeError::ListingPage {
                url: url.to_string(),
                source: other,
            },
        }
    }

    /// True when the error aborts the whole run rather than one URL.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ScrapeError::ListingPage { .. })
    }
}

/// Capability contract every site adapter satisfies.
///
/// Adapters share this contract and nothing else: parsing stays site-private
/// so one site's markup churn never leaks into another implementation.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Site this adapter handles
    fn site(&self) -> Site;

    /// Render a search configuration into the site's search URL for the
    /// given 0-based results page. Free-text fields that would land in a
    /// host position are restricted to alphanumerics.
    fn build_search_url(&self, config: &SearchConfig, page: u32) -> Result<Url, ScrapeError>;

    /// Derive the site-native post id from a candidate listing URL without
    /// fetching it. None when the URL cannot carry one.
    fn post_id_from_url(&self, url: &str) -> Option<String>;

    /// Paginate the search into candidate listing URLs. Stops when a page's
    /// canonical URL repeats one already visited or the results marker
    /// stays absent past its bounded wait.
    async fn list_search_result_urls(
        &self,
        fetcher: &dyn PageFetcher,
        config: &SearchConfig,
    ) -> Result<Vec<String>, ScrapeError>;

    /// Load one listing page and extract the normalized record. Ok(None)
    /// when the page renders but its mandatory title anchor never appears.
    async fn fetch_listing(
        &self,
        fetcher: &dyn PageFetcher,
        url: &str,
    ) -> Result<Option<Listing>, ScrapeError>;

    /// Pure filter: every configured minimum must be met; an unset minimum
    /// constrains nothing.
    fn is_acceptable(&self, listing: &Listing, config: &SearchConfig) -> bool {
        meets_minimums(listing, config)
    }
}

pub(crate) fn meets_minimums(listing: &Listing, config: &SearchConfig) -> bool {
    if let Some(min) = config.min_bedrooms {
        if listing.bedrooms < min {
            return false;
        }
    }
    if let Some(min) = config.min_bathrooms {
        if listing.bathrooms < min {
            return false;
        }
    }
    if let Some(min) = config.min_square_feet {
        if listing.square_footage < min {
            return false;
        }
    }
    true
}
