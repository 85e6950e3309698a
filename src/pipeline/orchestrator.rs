use std::collections::HashSet;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::browser::PageFetcher;
use crate::models::identity_hash;
use crate::scrapers::{ScrapeError, ScrapeItem, SearchConfig, SiteAdapter};

/// Per-run totals from the candidate loop
#[derive(Debug, Default, Clone, Copy)]
pub struct ScrapeCounts {
    pub new_listings: usize,
    pub known_references: usize,
    pub skipped: usize,
}

/// Walk the adapter's search results and stream classified items into `tx`.
///
/// `known_hashes` is this run's private snapshot of storage. Candidates whose
/// hash is already known are forwarded as [`ScrapeItem::Known`] without
/// touching their pages; a hash emitted as [`ScrapeItem::New`] joins a
/// run-local set so the same posting seen again is not re-fetched or re-sent.
pub async fn run(
    adapter: &dyn SiteAdapter,
    fetcher: &dyn PageFetcher,
    config: &SearchConfig,
    known_hashes: HashSet<String>,
    tx: mpsc::Sender<ScrapeItem>,
) -> Result<ScrapeCounts, ScrapeError> {
    let mut counts = ScrapeCounts::default();
    let mut emitted: HashSet<String> = HashSet::new();

    let candidates = adapter.list_search_result_urls(fetcher, config).await?;
    info!(
        site = %adapter.site(),
        candidates = candidates.len(),
        known = known_hashes.len(),
        "search pass complete"
    );

    for url in candidates {
        if let Some(cap) = config.max_listings_to_scrape {
            if counts.new_listings >= cap {
                info!(cap, "scrape cap reached, leaving remaining candidates");
                break;
            }
        }

        let Some(post_id) = adapter.post_id_from_url(&url) else {
            warn!(%url, "candidate url carries no post id, skipping");
            counts.skipped += 1;
            continue;
        };
        let hash = identity_hash(&post_id);

        if emitted.contains(&hash) {
            debug!(%url, "posting already scraped this run, skipping");
            counts.skipped += 1;
            continue;
        }

        if known_hashes.contains(&hash) {
            debug!(%url, "posting already in storage, linking without fetch");
            counts.known_references += 1;
            if tx.send(ScrapeItem::Known(hash)).await.is_err() {
                break;
            }
            continue;
        }

        match adapter.fetch_listing(fetcher, &url).await {
            Ok(Some(listing)) => {
                if !adapter.is_acceptable(&listing, config) {
                    debug!(%url, title = %listing.title, "listing misses configured minimums, skipping");
                    counts.skipped += 1;
                    continue;
                }
                info!(title = %listing.title, price = listing.price, %url, "scraped new listing");
                emitted.insert(listing.hash.clone());
                counts.new_listings += 1;
                if tx.send(ScrapeItem::New(Box::new(listing))).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!(%url, "listing page had no usable content, skipping");
                counts.skipped += 1;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(%url, error = %e, "listing fetch failed, skipping");
                counts.skipped += 1;
            }
        }
    }

    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::browser::testing::{rendered, ScriptedFetcher};
    use crate::scrapers::CraigslistAdapter;
    use crate::scrapers::ScraperSettings;

    fn adapter() -> CraigslistAdapter {
        CraigslistAdapter::new(ScraperSettings {
            page_delay: Duration::ZERO,
            element_timeout: Duration::from_secs(1),
        })
    }

    fn sfbay_config(cap: Option<usize>) -> SearchConfig {
        SearchConfig {
            location: Some("sfbay".to_string()),
            max_listings_to_scrape: cap,
            ..SearchConfig::default()
        }
    }

    fn listing_url(id: u64) -> String {
        format!("https://sfbay.craigslist.org/sfc/apa/d/flat/{id}.html")
    }

    fn posting_page(id: u64) -> String {
        format!(
            r#"<html><body>
              <span class="postingtitletext">
                <span id="titletextonly">Flat {id}</span>
                <span class="price">$2,100</span>
              </span>
              <p class="attrgroup"><span>2br - 1ba</span><span>900ft2</span></p>
            </body></html>"#
        )
    }

    /// Search page 0 listing the given posting ids; page 1 redirects back to
    /// page 0's canonical URL so pagination stops after two loads.
    fn scripted_search(
        adapter: &CraigslistAdapter,
        config: &SearchConfig,
        ids: &[u64],
    ) -> ScriptedFetcher {
        let cards: String = ids
            .iter()
            .map(|id| {
                format!(
                    r#"<div class="gallery-card"><a href="{}">flat</a></div>"#,
                    listing_url(*id)
                )
            })
            .collect();
        let html = format!("<html><body>{cards}</body></html>");

        let page0 = adapter.build_search_url(config, 0).unwrap().to_string();
        let page1 = adapter.build_search_url(config, 1).unwrap().to_string();
        let mut fetcher = ScriptedFetcher::new()
            .page(&page0, rendered(&page0, &html))
            .page(&page1, rendered(&page0, &html));
        for id in ids {
            let url = listing_url(*id);
            fetcher = fetcher.page(&url, rendered(&url, &posting_page(*id)));
        }
        fetcher
    }

    async fn drain(mut rx: mpsc::Receiver<ScrapeItem>) -> Vec<ScrapeItem> {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn cap_stops_after_enough_new_listings() {
        let adapter = adapter();
        let config = sfbay_config(Some(2));
        let fetcher = scripted_search(&adapter, &config, &[1, 2, 3, 4, 5]);
        let (tx, rx) = mpsc::channel(16);

        let counts = run(&adapter, &fetcher, &config, HashSet::new(), tx)
            .await
            .unwrap();

        assert_eq!(counts.new_listings, 2);
        assert_eq!(counts.known_references, 0);

        let items = drain(rx).await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| matches!(i, ScrapeItem::New(_))));

        // Candidates past the cap were never fetched
        let listing_requests: Vec<String> = fetcher
            .request_log()
            .into_iter()
            .filter(|u| u.contains("/apa/d/"))
            .collect();
        assert_eq!(listing_requests, vec![listing_url(1), listing_url(2)]);
    }

    #[tokio::test]
    async fn known_hashes_are_linked_without_fetching() {
        let adapter = adapter();
        let config = sfbay_config(None);
        let fetcher = scripted_search(&adapter, &config, &[10, 11]);

        let known: HashSet<String> = [identity_hash("10")].into_iter().collect();
        let (tx, rx) = mpsc::channel(16);

        let counts = run(&adapter, &fetcher, &config, known, tx).await.unwrap();

        assert_eq!(counts.known_references, 1);
        assert_eq!(counts.new_listings, 1);

        let items = drain(rx).await;
        assert_eq!(items[0], ScrapeItem::Known(identity_hash("10")));
        assert!(matches!(&items[1], ScrapeItem::New(l) if l.post_id == "11"));

        let log = fetcher.request_log();
        assert!(!log.contains(&listing_url(10)));
        assert!(log.contains(&listing_url(11)));
    }

    #[tokio::test]
    async fn known_references_before_the_cap_still_flow() {
        let adapter = adapter();
        let config = sfbay_config(Some(1));
        let fetcher = scripted_search(&adapter, &config, &[20, 21, 22]);

        let known: HashSet<String> = [identity_hash("20")].into_iter().collect();
        let (tx, rx) = mpsc::channel(16);

        let counts = run(&adapter, &fetcher, &config, known, tx).await.unwrap();

        // The known reference does not consume the cap
        assert_eq!(counts.known_references, 1);
        assert_eq!(counts.new_listings, 1);

        let items = drain(rx).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], ScrapeItem::Known(identity_hash("20")));
        assert!(matches!(&items[1], ScrapeItem::New(l) if l.post_id == "21"));
    }

    #[tokio::test]
    async fn candidate_repeated_in_one_run_is_emitted_once() {
        let adapter = adapter();
        let config = sfbay_config(None);
        let fetcher = scripted_search(&adapter, &config, &[7, 7]);
        let (tx, rx) = mpsc::channel(16);

        let counts = run(&adapter, &fetcher, &config, HashSet::new(), tx)
            .await
            .unwrap();

        assert_eq!(counts.new_listings, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(drain(rx).await.len(), 1);
    }

    #[tokio::test]
    async fn unacceptable_listings_are_not_emitted() {
        let adapter = adapter();
        let mut config = sfbay_config(None);
        config.min_bedrooms = Some(3);
        let fetcher = scripted_search(&adapter, &config, &[30]);
        let (tx, rx) = mpsc::channel(16);

        let counts = run(&adapter, &fetcher, &config, HashSet::new(), tx)
            .await
            .unwrap();

        // The scripted posting is a 2br
        assert_eq!(counts.new_listings, 0);
        assert_eq!(counts.skipped, 1);
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn one_bad_listing_page_does_not_stop_the_run() {
        let adapter = adapter();
        let config = sfbay_config(None);
        let fetcher = scripted_search(&adapter, &config, &[31, 32])
            .failure(&listing_url(31), "net::ERR_TIMED_OUT");
        let (tx, rx) = mpsc::channel(16);

        let counts = run(&adapter, &fetcher, &config, HashSet::new(), tx)
            .await
            .unwrap();

        assert_eq!(counts.new_listings, 1);
        assert_eq!(counts.skipped, 1);

        let items = drain(rx).await;
        assert!(matches!(&items[0], ScrapeItem::New(l) if l.post_id == "32"));
    }

    #[tokio::test]
    async fn session_outage_aborts_the_run() {
        let adapter = adapter();
        let config = sfbay_config(None);
        let fetcher = ScriptedFetcher::new().session_down();
        let (tx, _rx) = mpsc::channel(16);

        let err = run(&adapter, &fetcher, &config, HashSet::new(), tx)
            .await
            .unwrap_err();

        assert!(matches!(err, ScrapeError::Session(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn candidate_without_post_id_is_skipped() {
        let adapter = adapter();
        let config = sfbay_config(None);
        let page0 = adapter.build_search_url(&config, 0).unwrap().to_string();
        let page1 = adapter.build_search_url(&config, 1).unwrap().to_string();
        let html = r#"<html><body>
          <div class="gallery-card"><a href="https://sfbay.craigslist.org/apa/d/x/gone?expired=1">gone</a></div>
        </body></html>"#;
        let fetcher = ScriptedFetcher::new()
            .page(&page0, rendered(&page0, html))
            .page(&page1, rendered(&page0, html));
        let (tx, rx) = mpsc::channel(16);

        let counts = run(&adapter, &fetcher, &config, HashSet::new(), tx)
            .await
            .unwrap();

        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.new_listings, 0);
        assert!(drain(rx).await.is_empty());
    }
}
