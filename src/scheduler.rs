//! Fixed-interval driver that runs at most one job cycle at a time.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::browser::PageFetcher;
use crate::config::SchedulerConfig;
use crate::db::Database;
use crate::pipeline::run_job_cycle;
use crate::scoring::AestheticScorer;
use crate::scrapers::ScraperSettings;

/// Wakes on a fixed interval and hands the stalest pending job to the
/// pipeline. A cycle may outlast the interval; wake-ups arriving while one is
/// running are skipped, not queued.
pub struct Scheduler {
    db: Database,
    fetcher: Arc<dyn PageFetcher>,
    scorer: Arc<dyn AestheticScorer>,
    settings: ScraperSettings,
    config: SchedulerConfig,
    /// Held for the duration of a cycle; `try_lock` failing means one is
    /// already in flight
    running: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(
        db: Database,
        fetcher: Arc<dyn PageFetcher>,
        scorer: Arc<dyn AestheticScorer>,
        settings: ScraperSettings,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            fetcher,
            scorer,
            settings,
            config,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Tick until the process dies. Each wake-up runs on its own task so a
    /// slow cycle never blocks the ticker itself.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval = ?self.config.interval,
            staleness = ?self.config.staleness,
            "scheduler running"
        );
        let mut ticker = interval(self.config.interval);

        loop {
            ticker.tick().await;
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move { scheduler.tick().await });
        }
    }

    /// One wake-up: skip if a cycle is in flight, otherwise run the stalest
    /// pending job, if any.
    pub async fn tick(&self) {
        let Ok(_running) = self.running.try_lock() else {
            debug!("cycle already in flight, skipping this wake-up");
            return;
        };

        let job = match self.db.next_pending_job(self.config.staleness).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!("no job stale enough to run");
                return;
            }
            Err(e) => {
                warn!(error = %e, "pending-job query failed");
                return;
            }
        };

        info!(job_id = job.id, name = %job.name, "running scheduled cycle");
        match run_job_cycle(
            &self.db,
            self.fetcher.as_ref(),
            self.scorer.as_ref(),
            self.settings,
            job.id,
        )
        .await
        {
            Ok(report) => info!(job_id = job.id, %report, "scheduled cycle finished"),
            // The job stays stale, so the next wake-up retries it
            Err(e) => warn!(job_id = job.id, error = %e, "scheduled cycle failed"),
        }
    }
}
