use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{JobTemplate, Listing};

/// Immutable per-job scraping parameters, built once from a JobTemplate and
/// never touched mid-run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    pub template_id: i64,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub min_bedrooms: Option<i64>,
    pub min_bathrooms: Option<f64>,
    pub min_square_feet: Option<i64>,
    /// Free-text location token; adapters validate before use
    pub location: Option<String>,
    pub zipcode: Option<String>,
    pub search_radius_miles: Option<f64>,
    /// Stop after this many newly scraped listings; None = unbounded
    pub max_listings_to_scrape: Option<usize>,
}

impl SearchConfig {
    pub fn from_template(template: &JobTemplate) -> Self {
        Self {
            template_id: template.id,
            min_price: template.min_price,
            max_price: template.max_price,
            min_bedrooms: template.min_bedrooms,
            min_bathrooms: template.min_bathrooms,
            min_square_feet: template.min_square_feet,
            location: template.location.clone(),
            zipcode: template.zipcode.clone(),
            search_radius_miles: template.search_radius_miles,
            max_listings_to_scrape: template
                .max_listings_to_scrape
                .and_then(|n| usize::try_from(n).ok()),
        }
    }
}

/// One item of the scrape stream
#[derive(Debug, Clone, PartialEq)]
pub enum ScrapeItem {
    /// Identity hash of a listing storage already knows; not re-fetched
    Known(String),
    /// Newly scraped listing, not yet persisted
    New(Box<Listing>),
}

/// Pacing and wait bounds shared by every adapter
#[derive(Debug, Clone, Copy)]
pub struct ScraperSettings {
    /// Fixed delay between search-page loads
    pub page_delay: Duration,
    /// Bounded wait for results markers and mandatory anchors
    pub element_timeout: Duration,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(200),
            element_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Site;
    use chrono::Utc;

    fn template() -> JobTemplate {
        JobTemplate {
            id: 7,
            site: Site::Craigslist,
            min_price: Some(500),
            max_price: Some(2500),
            min_bedrooms: Some(4),
            min_bathrooms: Some(2.0),
            min_square_feet: Some(1000),
            target_price: Some(2000),
            location: Some("sfbay".to_string()),
            zipcode: Some("94103".to_string()),
            search_radius_miles: Some(10.0),
            max_listings_to_scrape: Some(25),
            criteria: "bright, top floor".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn config_carries_template_fields() {
        let config = SearchConfig::from_template(&template());
        assert_eq!(config.template_id, 7);
        assert_eq!(config.min_price, Some(500));
        assert_eq!(config.max_price, Some(2500));
        assert_eq!(config.min_bedrooms, Some(4));
        assert_eq!(config.location.as_deref(), Some("sfbay"));
        assert_eq!(config.max_listings_to_scrape, Some(25));
    }

    #[test]
    fn negative_scrape_cap_is_treated_as_unbounded() {
        let mut t = template();
        t.max_listings_to_scrape = Some(-1);
        let config = SearchConfig::from_template(&t);
        assert_eq!(config.max_listings_to_scrape, None);
    }
}
