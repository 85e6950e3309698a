use chrono::Utc;
use sqlx::Row;

use crate::db::{listing_from_row, Database, DbError, EvaluationOutcome, ScoredListing};
use crate::models::{JobListingScore, ScoreStatus};

async fn apply_evaluation<'e, E>(
    executor: E,
    job_id: i64,
    listing_id: i64,
    score: f64,
    trace: &str,
    status: ScoreStatus,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "UPDATE job_listing_scores \
         SET score = ?, trace = ?, status = ?, updated_at = ? \
         WHERE job_id = ? AND listing_id = ?",
    )
    .bind(score)
    .bind(trace)
    .bind(status.as_str())
    .bind(Utc::now())
    .bind(job_id)
    .bind(listing_id)
    .execute(executor)
    .await
    .map(|_| ())
}

impl Database {
    /// Create the pending evaluation row for a job-listing pair if none
    /// exists. Rows that were already scored or failed are left alone, so a
    /// listing is never queued for evaluation twice.
    pub async fn ensure_score_pending(
        &self,
        job_id: i64,
        listing_id: i64,
    ) -> Result<bool, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO job_listing_scores
                (job_id, listing_id, score, trace, status, created_at, updated_at)
            VALUES (?, ?, 0, '', 'pending', ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(listing_id)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Listings still awaiting evaluation for a job, oldest first.
    pub async fn pending_evaluations(
        &self,
        job_id: i64,
    ) -> Result<Vec<(i64, crate::models::Listing)>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT l.*
            FROM job_listing_scores s
            JOIN listings l ON l.id = s.listing_id
            WHERE s.job_id = ? AND s.status = 'pending'
            ORDER BY l.id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(self.pool())
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in &rows {
            let listing_id: i64 = row.try_get("id")?;
            let listing = listing_from_row(row)?;
            pending.push((listing_id, listing));
        }
        Ok(pending)
    }

    pub async fn record_score(
        &self,
        job_id: i64,
        listing_id: i64,
        score: f64,
        trace: &str,
    ) -> Result<(), DbError> {
        apply_evaluation(self.pool(), job_id, listing_id, score, trace, ScoreStatus::Scored)
            .await?;
        Ok(())
    }

    /// Evaluation could not complete for this pair. The reason lands in the
    /// trace so the row stays diagnosable without being retried forever.
    pub async fn mark_score_failed(
        &self,
        job_id: i64,
        listing_id: i64,
        trace: &str,
    ) -> Result<(), DbError> {
        apply_evaluation(self.pool(), job_id, listing_id, 0.0, trace, ScoreStatus::Failed)
            .await?;
        Ok(())
    }

    /// Persist a batch of finished evaluations in one transaction.
    pub async fn record_evaluation_batch(
        &self,
        job_id: i64,
        outcomes: &[EvaluationOutcome],
    ) -> Result<(), DbError> {
        let mut tx = self.pool().begin().await?;
        for outcome in outcomes {
            apply_evaluation(
                &mut *tx,
                job_id,
                outcome.listing_id,
                outcome.score,
                &outcome.trace,
                outcome.status,
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_score(
        &self,
        job_id: i64,
        listing_id: i64,
    ) -> Result<Option<JobListingScore>, DbError> {
        let row = sqlx::query(
            "SELECT * FROM job_listing_scores WHERE job_id = ? AND listing_id = ?",
        )
        .bind(job_id)
        .bind(listing_id)
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw_status: String = row.try_get("status")?;
        let status = ScoreStatus::parse(&raw_status).ok_or_else(|| {
            DbError::Sqlx(sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: format!("unknown score status {:?}", raw_status).into(),
            })
        })?;

        Ok(Some(JobListingScore {
            job_id: row.try_get("job_id")?,
            listing_id: row.try_get("listing_id")?,
            score: row.try_get("score")?,
            trace: row.try_get("trace")?,
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    /// Scored listings for a job, best first. Pending and failed rows never
    /// appear in rankings.
    pub async fn top_listings(
        &self,
        job_id: i64,
        limit: i64,
    ) -> Result<Vec<ScoredListing>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT l.*, s.score AS score, s.trace AS trace
            FROM job_listing_scores s
            JOIN listings l ON l.id = s.listing_id
            WHERE s.job_id = ? AND s.status = 'scored'
            ORDER BY s.score DESC
            LIMIT ?
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        let mut ranked = Vec::with_capacity(rows.len());
        for row in &rows {
            ranked.push(ScoredListing {
                listing_id: row.try_get("id")?,
                score: row.try_get("score")?,
                trace: row.try_get("trace")?,
                listing: listing_from_row(row)?,
            });
        }
        Ok(ranked)
    }
}
