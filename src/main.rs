use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rent_scout::browser::{BrowserSession, PageFetcher};
use rent_scout::config::AppConfig;
use rent_scout::db::Database;
use rent_scout::models::JobInput;
use rent_scout::pipeline::run_job_cycle;
use rent_scout::scheduler::Scheduler;
use rent_scout::scoring::scorer_from_config;
use rent_scout::scrapers::ScraperSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🏠 Rent Scout");
    info!("=============");

    let config = AppConfig::from_env();
    let args: Vec<String> = env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        None | Some("serve") => serve(config).await,
        Some("run") => {
            let job_id = parse_job_id(args.get(1))?;
            run_once(config, job_id).await
        }
        Some("add-job") => {
            let path = args
                .get(1)
                .context("usage: rent-scout add-job <file.json>")?;
            add_job(config, Path::new(path)).await
        }
        Some("top") => {
            let job_id = parse_job_id(args.get(1))?;
            let limit = match args.get(2) {
                Some(raw) => raw.parse::<i64>().context("limit must be a number")?,
                None => 10,
            };
            top(config, job_id, limit).await
        }
        Some(other) => bail!("unknown command {other:?}; expected serve, run, add-job or top"),
    }
}

fn parse_job_id(arg: Option<&String>) -> anyhow::Result<i64> {
    arg.context("expected a job id")?
        .parse::<i64>()
        .context("job id must be a number")
}

fn scraper_settings(config: &AppConfig) -> ScraperSettings {
    ScraperSettings {
        page_delay: config.page_delay,
        element_timeout: config.element_timeout,
    }
}

/// Run the scheduler loop until the process is killed.
async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path).await?;
    let session = Arc::new(BrowserSession::new(config.browser.clone()));
    let scorer = scorer_from_config(&config.llm);
    let settings = scraper_settings(&config);

    info!(db = %config.database_path.display(), "serving");
    let scheduler = Arc::new(Scheduler::new(
        db,
        session,
        scorer,
        settings,
        config.scheduler.clone(),
    ));
    scheduler.run().await;
    Ok(())
}

/// One job cycle right now, without the scheduler.
async fn run_once(config: AppConfig, job_id: i64) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path).await?;
    let session = BrowserSession::new(config.browser.clone());
    let scorer = scorer_from_config(&config.llm);
    let settings = scraper_settings(&config);

    let result = run_job_cycle(&db, &session, scorer.as_ref(), settings, job_id).await;
    session.release().await;

    let report = result?;
    println!("job {job_id}: {report}");
    Ok(())
}

/// Create a template and job from a JSON job-input file.
async fn add_job(config: AppConfig, path: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("could not read {}", path.display()))?;
    let input: JobInput = serde_json::from_str(&raw)
        .with_context(|| format!("could not parse {}", path.display()))?;

    let db = Database::open(&config.database_path).await?;
    let template_id = db.create_job_template(&input).await?;
    let job_id = db.create_job(template_id, &input.name, &input.owner).await?;

    println!("created job {} ({}) on {}", job_id, input.name, input.site);
    Ok(())
}

/// Print the job's scored listings, best first.
async fn top(config: AppConfig, job_id: i64, limit: i64) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path).await?;
    let ranked = db.top_listings(job_id, limit).await?;

    if ranked.is_empty() {
        println!("no scored listings for job {job_id} yet");
        return Ok(());
    }

    for (i, entry) in ranked.iter().enumerate() {
        let listing = &entry.listing;
        println!(
            "{}. [{:.1}] {} (${}/mo)",
            i + 1,
            entry.score,
            listing.title,
            listing.price
        );
        println!(
            "   {}br / {}ba / {}sqft",
            listing.bedrooms, listing.bathrooms, listing.square_footage
        );
        if !listing.neighborhood.is_empty() {
            println!("   {}", listing.neighborhood);
        }
        println!("   {}", listing.url);
        println!("   {}", entry.trace);
        println!();
    }
    Ok(())
}
