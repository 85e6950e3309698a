use std::collections::HashSet;

use chrono::Utc;

use crate::db::{listing_from_row, Database, DbError, StoredListing};
use crate::models::Listing;

impl Database {
    /// Insert a listing unless its hash is already stored. Existing rows are
    /// never modified; re-scraped content does not overwrite what a previous
    /// run saved.
    pub async fn store_listing(&self, listing: &Listing) -> Result<StoredListing, DbError> {
        let image_urls = serde_json::to_string(&listing.image_urls)
            .unwrap_or_else(|_| "[]".to_string());

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO listings
                (hash, post_id, title, price, bedrooms, bathrooms, square_footage,
                 location, neighborhood, description, image_urls, url, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&listing.hash)
        .bind(&listing.post_id)
        .bind(&listing.title)
        .bind(listing.price)
        .bind(listing.bedrooms)
        .bind(listing.bathrooms)
        .bind(listing.square_footage)
        .bind(&listing.location)
        .bind(&listing.neighborhood)
        .bind(&listing.description)
        .bind(&image_urls)
        .bind(&listing.url)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        let inserted = result.rows_affected() == 1;

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM listings WHERE hash = ?")
            .bind(&listing.hash)
            .fetch_one(self.pool())
            .await?;

        Ok(StoredListing { id, inserted })
    }

    /// Every stored listing hash. Loaded once per run so URL prefiltering
    /// does not hit the database per listing.
    pub async fn known_hashes(&self) -> Result<HashSet<String>, DbError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT hash FROM listings")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(|(hash,)| hash).collect())
    }

    pub async fn listing_id_by_hash(&self, hash: &str) -> Result<Option<i64>, DbError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM listings WHERE hash = ?")
            .bind(hash)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn get_listing(&self, id: i64) -> Result<Option<Listing>, DbError> {
        let row = sqlx::query("SELECT * FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(listing_from_row).transpose().map_err(DbError::from)
    }

    pub async fn listing_count(&self) -> Result<i64, DbError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM listings")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }
}
