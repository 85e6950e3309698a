//! One job cycle: scrape, ingest, evaluate.
//!
//! The cycle is an explicit entry point rather than a background side effect:
//! the scheduler calls it on its tick, the CLI calls it directly, and a rerun
//! over unchanged inputs is a persistence no-op.

pub mod evaluate;
pub mod ingest;
pub mod orchestrator;

use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::browser::PageFetcher;
use crate::db::{Database, DbError};
use crate::scoring::AestheticScorer;
use crate::scrapers::{adapter_for, ScrapeError, ScraperSettings, SearchConfig};

pub use ingest::IngestReport;
pub use orchestrator::ScrapeCounts;

/// Backpressure bound between the scrape and ingestion tasks
const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("job {0} does not exist")]
    JobNotFound(i64),
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("ingestion task failed: {0}")]
    IngestTask(String),
}

/// What one call to [`run_job_cycle`] did
#[derive(Debug, Default, Clone, Copy)]
pub struct JobCycleReport {
    pub new_listings: usize,
    pub known_references: usize,
    pub skipped: usize,
    pub stored_new: usize,
    pub linked_references: usize,
    pub evaluated: usize,
}

impl fmt::Display for JobCycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new, {} known, {} skipped; stored {}, linked {}, evaluated {}",
            self.new_listings,
            self.known_references,
            self.skipped,
            self.stored_new,
            self.linked_references,
            self.evaluated
        )
    }
}

/// Run one full cycle for `job_id`: scrape the job's site, ingest the stream,
/// then evaluate everything left pending.
///
/// Scrape and ingestion run as two tasks over a bounded channel and are
/// joined before evaluation starts, so score rows only ever reference stored
/// listings. On a scrape-phase error the browser session is released before
/// the error propagates, leaving the next cycle a clean slate.
pub async fn run_job_cycle(
    db: &Database,
    fetcher: &dyn PageFetcher,
    scorer: &dyn AestheticScorer,
    settings: ScraperSettings,
    job_id: i64,
) -> Result<JobCycleReport, PipelineError> {
    let job = db
        .get_job(job_id)
        .await?
        .ok_or(PipelineError::JobNotFound(job_id))?;
    let template = db
        .get_job_template(job_id)
        .await?
        .ok_or(PipelineError::JobNotFound(job_id))?;
    info!(job_id, name = %job.name, site = %template.site, "starting job cycle");

    let config = SearchConfig::from_template(&template);
    let known = db.known_hashes().await?;

    let adapter = adapter_for(template.site, settings);
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let ingest_task = tokio::spawn(ingest::run(db.clone(), job_id, rx));

    // The sender moves into the orchestrator; when it returns, the channel
    // closes and the ingestion task drains to completion.
    let counts = match orchestrator::run(adapter.as_ref(), fetcher, &config, known, tx).await {
        Ok(counts) => counts,
        Err(e) => {
            fetcher.release().await;
            if let Ok(Err(db_err)) = ingest_task.await {
                warn!(error = %db_err, "ingestion failed while the scrape was aborting");
            }
            return Err(e.into());
        }
    };

    let ingested = ingest_task
        .await
        .map_err(|e| PipelineError::IngestTask(e.to_string()))??;

    let evaluated = evaluate::run(db, scorer, &template, job_id).await?;
    db.touch_job(job_id).await?;

    let report = JobCycleReport {
        new_listings: counts.new_listings,
        known_references: counts.known_references,
        skipped: counts.skipped,
        stored_new: ingested.stored_new,
        linked_references: ingested.linked_references,
        evaluated,
    };
    info!(job_id, %report, "job cycle finished");
    Ok(report)
}
