use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Site a listing was scraped from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    Craigslist,
    Streeteasy,
    Zillow,
}

impl Site {
    pub fn as_str(&self) -> &'static str {
        match self {
            Site::Craigslist => "craigslist",
            Site::Streeteasy => "streeteasy",
            Site::Zillow => "zillow",
        }
    }

    pub fn parse(name: &str) -> Option<Site> {
        match name.trim().to_ascii_lowercase().as_str() {
            "craigslist" => Some(Site::Craigslist),
            "streeteasy" => Some(Site::Streeteasy),
            "zillow" => Some(Site::Zillow),
            _ => None,
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized, site-agnostic listing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Identity digest of `post_id`; the dedup key
    pub hash: String,
    /// Site-native posting id
    pub post_id: String,
    pub title: String,
    pub price: i64,
    pub bedrooms: i64,
    pub bathrooms: f64,
    pub square_footage: i64,
    pub location: String,
    pub neighborhood: String,
    /// Plain text, HTML stripped, paragraph breaks preserved
    pub description: String,
    /// Highest-resolution variants first where the site offers several
    pub image_urls: Vec<String>,
    /// Canonical source URL
    pub url: String,
}

/// Deterministic identity digest of a site-native post id.
///
/// Only the post id feeds the digest, so a price or description edit on the
/// site never changes a listing's identity.
pub fn identity_hash(post_id: &str) -> String {
    let digest = Sha256::digest(post_id.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// User-authored search criteria plus the free-text document the aesthetic
/// scorer judges against. Treated as immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    pub id: i64,
    pub site: Site,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub min_bedrooms: Option<i64>,
    pub min_bathrooms: Option<f64>,
    pub min_square_feet: Option<i64>,
    /// Target monthly price for heuristic scoring
    pub target_price: Option<i64>,
    pub location: Option<String>,
    pub zipcode: Option<String>,
    pub search_radius_miles: Option<f64>,
    pub max_listings_to_scrape: Option<i64>,
    pub criteria: String,
    pub created_at: DateTime<Utc>,
}

/// User-facing job creation payload with the stock defaults
#[derive(Debug, Clone, Deserialize)]
pub struct JobInput {
    pub name: String,
    #[serde(default = "default_site")]
    pub site: Site,
    #[serde(default)]
    pub min_price: Option<i64>,
    #[serde(default)]
    pub max_price: Option<i64>,
    #[serde(default = "default_min_bedrooms")]
    pub min_bedrooms: Option<i64>,
    #[serde(default = "default_min_bathrooms")]
    pub min_bathrooms: Option<f64>,
    #[serde(default = "default_min_square_feet")]
    pub min_square_feet: Option<i64>,
    #[serde(default = "default_target_price")]
    pub target_price: Option<i64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub zipcode: Option<String>,
    #[serde(default = "default_search_radius")]
    pub search_radius_miles: Option<f64>,
    #[serde(default)]
    pub max_listings_to_scrape: Option<i64>,
    #[serde(default)]
    pub criteria: String,
    #[serde(default = "default_owner")]
    pub owner: String,
}

fn default_site() -> Site {
    Site::Craigslist
}

fn default_min_bedrooms() -> Option<i64> {
    Some(4)
}

fn default_min_bathrooms() -> Option<f64> {
    Some(2.0)
}

fn default_min_square_feet() -> Option<i64> {
    Some(1000)
}

fn default_target_price() -> Option<i64> {
    Some(2000)
}

fn default_search_radius() -> Option<f64> {
    Some(10.0)
}

fn default_owner() -> String {
    "local".to_string()
}

/// One running instance of a template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub template_id: i64,
    pub name: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    /// Liveness signal: the scheduler treats a job as pending once this is
    /// older than the staleness window
    pub updated_at: DateTime<Utc>,
}

/// Evaluation state of a job-listing pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreStatus {
    Pending,
    Scored,
    Failed,
}

impl ScoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreStatus::Pending => "pending",
            ScoreStatus::Scored => "scored",
            ScoreStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<ScoreStatus> {
        match s {
            "pending" => Some(ScoreStatus::Pending),
            "scored" => Some(ScoreStatus::Scored),
            "failed" => Some(ScoreStatus::Failed),
            _ => None,
        }
    }
}

/// Association entity between a job and a listing; at most one row per pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListingScore {
    pub job_id: i64,
    pub listing_id: i64,
    pub score: f64,
    pub trace: String,
    pub status: ScoreStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
