//! SQLite persistence for listings, jobs and their evaluation state.
//!
//! One pool-backed handle is shared across the scrape, ingestion and scoring
//! stages. WAL mode keeps readers unblocked while the ingestion batches
//! commit.

mod jobs;
mod listings;
mod scores;

use std::path::Path;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::models::Listing;

const SCHEMA_SQL: &str = r#"
-- Deduplicated listing store shared by every job
CREATE TABLE IF NOT EXISTS listings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash TEXT NOT NULL UNIQUE,
    post_id TEXT NOT NULL,
    title TEXT NOT NULL,
    price INTEGER NOT NULL,
    bedrooms INTEGER NOT NULL,
    bathrooms REAL NOT NULL,
    square_footage INTEGER NOT NULL,
    location TEXT NOT NULL,
    neighborhood TEXT NOT NULL,
    description TEXT NOT NULL,
    image_urls TEXT NOT NULL,
    url TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Immutable search criteria authored at job creation
CREATE TABLE IF NOT EXISTS job_templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site TEXT NOT NULL,
    min_price INTEGER,
    max_price INTEGER,
    min_bedrooms INTEGER,
    min_bathrooms REAL,
    min_square_feet INTEGER,
    target_price INTEGER,
    location TEXT,
    zipcode TEXT,
    search_radius_miles REAL,
    max_listings_to_scrape INTEGER,
    criteria TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    template_id INTEGER NOT NULL REFERENCES job_templates(id),
    name TEXT NOT NULL,
    owner TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Index for the scheduler's staleness scan
CREATE INDEX IF NOT EXISTS idx_jobs_updated_at ON jobs(updated_at);

-- One evaluation per job-listing pair
CREATE TABLE IF NOT EXISTS job_listing_scores (
    job_id INTEGER NOT NULL REFERENCES jobs(id),
    listing_id INTEGER NOT NULL REFERENCES listings(id),
    score REAL NOT NULL DEFAULT 0,
    trace TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (job_id, listing_id)
);

-- Index for the scoring pass over unevaluated pairs
CREATE INDEX IF NOT EXISTS idx_scores_status ON job_listing_scores(job_id, status);
"#;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("database path error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of an insert-if-absent on the listing store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredListing {
    pub id: i64,
    /// False when the hash was already present and the row was left untouched
    pub inserted: bool,
}

/// A scored listing as surfaced to the ranking query
#[derive(Debug, Clone)]
pub struct ScoredListing {
    pub listing_id: i64,
    pub score: f64,
    pub trace: String,
    pub listing: Listing,
}

/// One finished evaluation, ready to persist
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub listing_id: i64,
    pub score: f64,
    pub trace: String,
    pub status: crate::models::ScoreStatus,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Rebuild a [`Listing`] from a row that carries the full listings column
/// set, whether selected directly or through a join.
pub(crate) fn listing_from_row(row: &SqliteRow) -> Result<Listing, sqlx::Error> {
    let raw_images: String = row.try_get("image_urls")?;
    let image_urls: Vec<String> =
        serde_json::from_str(&raw_images).map_err(|e| sqlx::Error::ColumnDecode {
            index: "image_urls".to_string(),
            source: Box::new(e),
        })?;

    Ok(Listing {
        hash: row.try_get("hash")?,
        post_id: row.try_get("post_id")?,
        title: row.try_get("title")?,
        price: row.try_get("price")?,
        bedrooms: row.try_get("bedrooms")?,
        bathrooms: row.try_get("bathrooms")?,
        square_footage: row.try_get("square_footage")?,
        location: row.try_get("location")?,
        neighborhood: row.try_get("neighborhood")?,
        description: row.try_get("description")?,
        image_urls,
        url: row.try_get("url")?,
    })
}
