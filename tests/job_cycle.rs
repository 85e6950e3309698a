//! End-to-end job cycles against a canned browser and a scratch database.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use rent_scout::browser::{BrowserError, FetchedPage, PageFetcher};
use rent_scout::db::Database;
use rent_scout::models::{identity_hash, JobInput, ScoreStatus};
use rent_scout::pipeline::run_job_cycle;
use rent_scout::scoring::DisabledScorer;
use rent_scout::scrapers::{CraigslistAdapter, ScraperSettings, SearchConfig, SiteAdapter};

/// Pages keyed by URL, like a recorded browsing session.
struct CannedBrowser {
    pages: HashMap<String, FetchedPage>,
    requests: Mutex<Vec<String>>,
}

impl CannedBrowser {
    fn new() -> Self {
        Self {
            pages: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_page(mut self, url: &str, final_url: &str, html: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                final_url: final_url.to_string(),
                html: html.to_string(),
                marker_found: true,
            },
        );
        self
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for CannedBrowser {
    async fn fetch_page(
        &self,
        url: &str,
        _wait_selector: &str,
        _wait_timeout: Duration,
    ) -> Result<FetchedPage, BrowserError> {
        self.requests.lock().unwrap().push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| BrowserError::Navigation {
                url: url.to_string(),
                message: "no canned page".to_string(),
            })
    }
}

fn settings() -> ScraperSettings {
    ScraperSettings {
        page_delay: Duration::ZERO,
        element_timeout: Duration::from_secs(1),
    }
}

async fn open_db() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("scout.sqlite"))
        .await
        .unwrap();
    (dir, db)
}

async fn seeded_job(db: &Database, json: &str) -> i64 {
    let input: JobInput = serde_json::from_str(json).unwrap();
    let template_id = db.create_job_template(&input).await.unwrap();
    db.create_job(template_id, &input.name, &input.owner)
        .await
        .unwrap()
}

fn posting_url(id: u64) -> String {
    format!("https://sfbay.craigslist.org/sfc/apa/d/flat/{id}.html")
}

fn posting_html(id: u64) -> String {
    format!(
        r#"<html><body>
          <span class="postingtitletext">
            <span id="titletextonly">Flat {id}</span>
            <span class="price">$1,900</span>
            <span>(mission district)</span>
          </span>
          <p class="attrgroup"><span>5br - 2ba</span><span>1300ft2</span></p>
          <section id="postingbody">Bright and airy.</section>
        </body></html>"#
    )
}

/// Results page 0 with the given postings; page 1 redirects back to page 0's
/// canonical URL, which ends pagination.
async fn canned_site(db: &Database, job_id: i64, ids: &[u64]) -> CannedBrowser {
    let template = db.get_job_template(job_id).await.unwrap().unwrap();
    let config = SearchConfig::from_template(&template);
    let adapter = CraigslistAdapter::new(settings());

    let cards: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<div class="gallery-card"><a href="{}">flat</a></div>"#,
                posting_url(*id)
            )
        })
        .collect();
    let results = format!("<html><body>{cards}</body></html>");

    let page0 = adapter.build_search_url(&config, 0).unwrap().to_string();
    let page1 = adapter.build_search_url(&config, 1).unwrap().to_string();

    let mut browser = CannedBrowser::new()
        .with_page(&page0, &page0, &results)
        .with_page(&page1, &page0, &results);
    for id in ids {
        let url = posting_url(*id);
        browser = browser.with_page(&url, &url, &posting_html(*id));
    }
    browser
}

#[tokio::test]
async fn capped_cycle_stores_exactly_the_cap() {
    let (_dir, db) = open_db().await;
    let job_id = seeded_job(
        &db,
        r#"{"name": "hunt", "location": "sfbay", "max_listings_to_scrape": 2}"#,
    )
    .await;
    let browser = canned_site(&db, job_id, &[1, 2, 3, 4, 5]).await;

    let report = run_job_cycle(&db, &browser, &DisabledScorer, settings(), job_id)
        .await
        .unwrap();

    assert_eq!(report.new_listings, 2);
    assert_eq!(report.stored_new, 2);
    assert_eq!(report.evaluated, 2);
    assert_eq!(db.listing_count().await.unwrap(), 2);

    let listing_fetches = browser
        .requests()
        .iter()
        .filter(|u| u.contains("/apa/d/"))
        .count();
    assert_eq!(listing_fetches, 2);
}

#[tokio::test]
async fn cycle_scores_against_the_template_targets() {
    let (_dir, db) = open_db().await;
    // Stock targets: price 2000, 1000sqft, 4 bedrooms, 2 bathrooms
    let job_id = seeded_job(&db, r#"{"name": "hunt", "location": "sfbay"}"#).await;
    let browser = canned_site(&db, job_id, &[77001]).await;

    run_job_cycle(&db, &browser, &DisabledScorer, settings(), job_id)
        .await
        .unwrap();

    let listing_id = db
        .listing_id_by_hash(&identity_hash("77001"))
        .await
        .unwrap()
        .unwrap();
    let score = db.get_score(job_id, listing_id).await.unwrap().unwrap();
    assert_eq!(score.status, ScoreStatus::Scored);

    let ranked = db.top_listings(job_id, 5).await.unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].score, 31.5);
    assert_eq!(
        ranked[0].trace,
        "Good price under $2000 | Good size at 1300sqft | Good number of bedrooms: 5 | \
         Moderate number of bathrooms: 2 | No evaluation model configured"
    );
}

#[tokio::test]
async fn rerun_links_known_listings_without_refetching() {
    let (_dir, db) = open_db().await;
    let job_id = seeded_job(&db, r#"{"name": "hunt", "location": "sfbay"}"#).await;
    let browser = canned_site(&db, job_id, &[11, 12]).await;

    let first = run_job_cycle(&db, &browser, &DisabledScorer, settings(), job_id)
        .await
        .unwrap();
    assert_eq!(first.new_listings, 2);

    let second = run_job_cycle(&db, &browser, &DisabledScorer, settings(), job_id)
        .await
        .unwrap();

    assert_eq!(second.new_listings, 0);
    assert_eq!(second.known_references, 2);
    assert_eq!(second.linked_references, 2);
    assert_eq!(second.evaluated, 0);
    assert_eq!(db.listing_count().await.unwrap(), 2);

    // Both posting pages were fetched in the first cycle only
    let listing_fetches = browser
        .requests()
        .iter()
        .filter(|u| u.contains("/apa/d/"))
        .count();
    assert_eq!(listing_fetches, 2);
}
