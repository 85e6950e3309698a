use tracing::{debug, info, warn};

use crate::db::{Database, DbError, EvaluationOutcome};
use crate::models::{JobTemplate, ScoreStatus};
use crate::scoring::{evaluate_heuristics, AestheticScorer, ScoreTargets};

/// Pending pairs are scored and committed this many at a time
const BATCH_SIZE: usize = 5;

/// Score every pending (job, listing) pair and persist the results.
///
/// The heuristic component always runs; the aesthetic scorer may fail per
/// listing, in which case it contributes (0, error text) and the pair is
/// still recorded. A pair where the aesthetic call failed and no heuristic
/// rule contributed either is marked failed rather than scored, so a later
/// operator can tell a genuine zero from a dead evaluation.
pub async fn run(
    db: &Database,
    scorer: &dyn AestheticScorer,
    template: &JobTemplate,
    job_id: i64,
) -> Result<usize, DbError> {
    let targets = ScoreTargets::from_template(template);
    let pending = db.pending_evaluations(job_id).await?;
    if pending.is_empty() {
        debug!(job_id, "no pending evaluations");
        return Ok(0);
    }
    info!(job_id, count = pending.len(), "evaluating pending listings");

    let mut evaluated = 0usize;
    for chunk in pending.chunks(BATCH_SIZE) {
        let mut outcomes = Vec::with_capacity(chunk.len());

        for (listing_id, listing) in chunk {
            let (heuristic_score, heuristic_trace) = evaluate_heuristics(listing, &targets);

            let (aesthetic_score, aesthetic_trace, aesthetic_failed) =
                match scorer.score(listing, &template.criteria).await {
                    Ok((score, trace)) => (score, trace, false),
                    Err(e) => {
                        warn!(url = %listing.url, error = %e, "aesthetic scoring failed");
                        (0, e.to_string(), true)
                    }
                };

            let status = if aesthetic_failed && heuristic_trace.is_empty() {
                ScoreStatus::Failed
            } else {
                ScoreStatus::Scored
            };
            let score = heuristic_score + aesthetic_score as f64;
            let trace = join_traces(&heuristic_trace, &aesthetic_trace);

            info!(
                title = %listing.title,
                score,
                status = status.as_str(),
                "evaluated listing"
            );
            outcomes.push(EvaluationOutcome {
                listing_id: *listing_id,
                score,
                trace,
                status,
            });
        }

        db.record_evaluation_batch(job_id, &outcomes).await?;
        evaluated += outcomes.len();
        debug!(count = outcomes.len(), "committed evaluation batch");
    }

    Ok(evaluated)
}

fn join_traces(heuristic: &str, aesthetic: &str) -> String {
    match (heuristic.is_empty(), aesthetic.is_empty()) {
        (true, _) => aesthetic.to_string(),
        (_, true) => heuristic.to_string(),
        (false, false) => format!("{} | {}", heuristic, aesthetic),
    }
}
