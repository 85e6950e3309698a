use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::db::{Database, DbError};
use crate::models::{Job, JobInput, JobTemplate, Site};

impl Database {
    /// Persist the immutable criteria half of a new job.
    pub async fn create_job_template(&self, input: &JobInput) -> Result<i64, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_templates
                (site, min_price, max_price, min_bedrooms, min_bathrooms,
                 min_square_feet, target_price, location, zipcode,
                 search_radius_miles, max_listings_to_scrape, criteria, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(input.site.as_str())
        .bind(input.min_price)
        .bind(input.max_price)
        .bind(input.min_bedrooms)
        .bind(input.min_bathrooms)
        .bind(input.min_square_feet)
        .bind(input.target_price)
        .bind(&input.location)
        .bind(&input.zipcode)
        .bind(input.search_radius_miles)
        .bind(input.max_listings_to_scrape)
        .bind(&input.criteria)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn create_job(
        &self,
        template_id: i64,
        name: &str,
        owner: &str,
    ) -> Result<i64, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO jobs (template_id, name, owner, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(template_id)
        .bind(name)
        .bind(owner)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<Job>, DbError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(job_from_row).transpose().map_err(DbError::from)
    }

    /// The criteria behind a job, resolved through its template reference.
    pub async fn get_job_template(&self, job_id: i64) -> Result<Option<JobTemplate>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT t.*
            FROM jobs j
            JOIN job_templates t ON t.id = j.template_id
            WHERE j.id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(template_from_row).transpose().map_err(DbError::from)
    }

    /// Oldest job not refreshed within the staleness window, if any.
    pub async fn next_pending_job(
        &self,
        stale_after: std::time::Duration,
    ) -> Result<Option<Job>, DbError> {
        let window = chrono::Duration::from_std(stale_after)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff = Utc::now() - window;

        let row = sqlx::query(
            "SELECT * FROM jobs WHERE updated_at < ? ORDER BY updated_at ASC LIMIT 1",
        )
        .bind(cutoff)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(job_from_row).transpose().map_err(DbError::from)
    }

    /// Record a completed cycle so the scheduler moves on to other jobs.
    pub async fn touch_job(&self, job_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE jobs SET updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(job_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job, sqlx::Error> {
    Ok(Job {
        id: row.try_get("id")?,
        template_id: row.try_get("template_id")?,
        name: row.try_get("name")?,
        owner: row.try_get("owner")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn template_from_row(row: &SqliteRow) -> Result<JobTemplate, sqlx::Error> {
    let raw_site: String = row.try_get("site")?;
    let site = Site::parse(&raw_site).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: "site".to_string(),
        source: format!("unknown site {:?}", raw_site).into(),
    })?;

    Ok(JobTemplate {
        id: row.try_get("id")?,
        site,
        min_price: row.try_get("min_price")?,
        max_price: row.try_get("max_price")?,
        min_bedrooms: row.try_get("min_bedrooms")?,
        min_bathrooms: row.try_get("min_bathrooms")?,
        min_square_feet: row.try_get("min_square_feet")?,
        target_price: row.try_get("target_price")?,
        location: row.try_get("location")?,
        zipcode: row.try_get("zipcode")?,
        search_radius_miles: row.try_get("search_radius_miles")?,
        max_listings_to_scrape: row.try_get("max_listings_to_scrape")?,
        criteria: row.try_get("criteria")?,
        created_at: row.try_get("created_at")?,
    })
}
