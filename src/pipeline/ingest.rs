use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::db::{Database, DbError};
use crate::models::Listing;
use crate::scrapers::ScrapeItem;

/// New listings accumulate until this many are ready, then flush together
const BATCH_SIZE: usize = 5;

/// Per-run totals from the consuming side of the scrape stream
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestReport {
    /// Listings inserted for the first time
    pub stored_new: usize,
    /// Known references resolved and linked to the job
    pub linked_references: usize,
}

/// Drain the scrape stream into storage until the sender side closes.
///
/// New listings are flushed in batches; each batch's rows are durable before
/// their pending score rows are created, because the score rows reference the
/// generated listing ids.
pub async fn run(
    db: Database,
    job_id: i64,
    mut rx: mpsc::Receiver<ScrapeItem>,
) -> Result<IngestReport, DbError> {
    let mut report = IngestReport::default();
    let mut batch: Vec<Listing> = Vec::with_capacity(BATCH_SIZE);

    while let Some(item) = rx.recv().await {
        match item {
            ScrapeItem::New(listing) => {
                batch.push(*listing);
                if batch.len() >= BATCH_SIZE {
                    flush(&db, job_id, &mut batch, &mut report).await?;
                }
            }
            ScrapeItem::Known(hash) => match db.listing_id_by_hash(&hash).await? {
                Some(listing_id) => {
                    db.ensure_score_pending(job_id, listing_id).await?;
                    report.linked_references += 1;
                }
                None => {
                    warn!(hash, "known reference not found in storage, skipping");
                }
            },
        }
    }

    flush(&db, job_id, &mut batch, &mut report).await?;
    Ok(report)
}

async fn flush(
    db: &Database,
    job_id: i64,
    batch: &mut Vec<Listing>,
    report: &mut IngestReport,
) -> Result<(), DbError> {
    if batch.is_empty() {
        return Ok(());
    }

    let mut listing_ids = Vec::with_capacity(batch.len());
    for listing in batch.iter() {
        let stored = db.store_listing(listing).await?;
        if stored.inserted {
            report.stored_new += 1;
        }
        listing_ids.push(stored.id);
    }
    for listing_id in listing_ids {
        db.ensure_score_pending(job_id, listing_id).await?;
    }

    debug!(count = batch.len(), "flushed listing batch");
    batch.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{open_temp, sample_listing};
    use crate::models::{identity_hash, ScoreStatus};

    async fn seeded_job(db: &Database) -> i64 {
        let input = serde_json::from_str(r#"{"name": "ingest"}"#).unwrap();
        let template_id = db.create_job_template(&input).await.unwrap();
        db.create_job(template_id, "ingest", "local").await.unwrap()
    }

    fn new_item(post_id: &str) -> ScrapeItem {
        ScrapeItem::New(Box::new(sample_listing(post_id)))
    }

    #[tokio::test]
    async fn stream_larger_than_one_batch_is_fully_stored() {
        let (_dir, db) = open_temp().await;
        let job_id = seeded_job(&db).await;

        let (tx, rx) = mpsc::channel(16);
        for i in 0..7 {
            tx.send(new_item(&format!("n{i}"))).await.unwrap();
        }
        drop(tx);

        let report = run(db.clone(), job_id, rx).await.unwrap();

        assert_eq!(report.stored_new, 7);
        assert_eq!(report.linked_references, 0);
        assert_eq!(db.listing_count().await.unwrap(), 7);
        assert_eq!(db.pending_evaluations(job_id).await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn known_references_link_existing_rows() {
        let (_dir, db) = open_temp().await;
        let job_id = seeded_job(&db).await;
        let stored = db.store_listing(&sample_listing("seen")).await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        tx.send(ScrapeItem::Known(identity_hash("seen")))
            .await
            .unwrap();
        drop(tx);

        let report = run(db.clone(), job_id, rx).await.unwrap();

        assert_eq!(report.linked_references, 1);
        assert_eq!(report.stored_new, 0);
        let score = db.get_score(job_id, stored.id).await.unwrap().unwrap();
        assert_eq!(score.status, ScoreStatus::Pending);
    }

    #[tokio::test]
    async fn unresolvable_known_reference_is_skipped() {
        let (_dir, db) = open_temp().await;
        let job_id = seeded_job(&db).await;

        let (tx, rx) = mpsc::channel(16);
        tx.send(ScrapeItem::Known(identity_hash("phantom")))
            .await
            .unwrap();
        tx.send(new_item("real")).await.unwrap();
        drop(tx);

        let report = run(db.clone(), job_id, rx).await.unwrap();

        assert_eq!(report.linked_references, 0);
        assert_eq!(report.stored_new, 1);
        assert_eq!(db.pending_evaluations(job_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replayed_stream_is_a_persistence_noop() {
        let (_dir, db) = open_temp().await;
        let job_id = seeded_job(&db).await;

        for _ in 0..2 {
            let (tx, rx) = mpsc::channel(16);
            tx.send(new_item("dup1")).await.unwrap();
            tx.send(new_item("dup2")).await.unwrap();
            drop(tx);
            run(db.clone(), job_id, rx).await.unwrap();
        }

        assert_eq!(db.listing_count().await.unwrap(), 2);
        assert_eq!(db.pending_evaluations(job_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn second_run_stores_nothing_new() {
        let (_dir, db) = open_temp().await;
        let job_id = seeded_job(&db).await;

        let (tx, rx) = mpsc::channel(16);
        tx.send(new_item("again")).await.unwrap();
        drop(tx);
        let first = run(db.clone(), job_id, rx).await.unwrap();
        assert_eq!(first.stored_new, 1);

        let (tx, rx) = mpsc::channel(16);
        tx.send(new_item("again")).await.unwrap();
        drop(tx);
        let second = run(db.clone(), job_id, rx).await.unwrap();
        assert_eq!(second.stored_new, 0);
    }
}
