use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::BrowserConfig;

pub mod retry;

pub use retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser session unavailable after {elapsed:?}: {last_error}")]
    SessionUnavailable { elapsed: Duration, last_error: String },
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("browser call failed: {0}")]
    Driver(String),
}

/// One rendered page, captured after scripts ran
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Canonical URL after any redirects
    pub final_url: String,
    /// `document.documentElement.outerHTML` of the rendered page
    pub html: String,
    /// Whether the awaited selector appeared within the timeout
    pub marker_found: bool,
}

/// Page-loading seam between the scrapers and the real browser.
///
/// Production uses [`BrowserSession`]; tests script a fake.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Navigate to `url`, wait up to `wait_timeout` for `wait_selector` to
    /// appear, then capture the rendered document. A missing marker is not
    /// an error; callers decide what it means.
    async fn fetch_page(
        &self,
        url: &str,
        wait_selector: &str,
        wait_timeout: Duration,
    ) -> Result<FetchedPage, BrowserError>;

    /// Tear down any underlying session. No-op for fetchers without one.
    async fn release(&self) {}
}

/// Owns at most one headless-Chrome handle for the whole process and
/// recreates it transparently when it dies.
pub struct BrowserSession {
    config: BrowserConfig,
    handle: Mutex<Option<SessionHandle>>,
}

#[derive(Clone)]
struct SessionHandle {
    browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserSession {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            handle: Mutex::new(None),
        }
    }

    /// Hand out a live session, probing the existing one first and
    /// recreating it when the probe fails.
    async fn acquire(&self) -> Result<SessionHandle, BrowserError> {
        let mut guard = self.handle.lock().await;

        if let Some(existing) = guard.as_ref() {
            let probe = existing.browser.clone();
            let alive = tokio::task::spawn_blocking(move || probe.get_version().is_ok())
                .await
                .unwrap_or(false);
            if alive {
                return Ok(existing.clone());
            }
            warn!("browser session failed liveness probe, recreating");
            let dead = guard.take();
            let _ = tokio::task::spawn_blocking(move || drop(dead)).await;
        }

        let handle = self.create_session().await?;
        *guard = Some(handle.clone());
        Ok(handle)
    }

    /// Retry session creation until the policy's attempt count or wall-clock
    /// budget runs out.
    async fn create_session(&self) -> Result<SessionHandle, BrowserError> {
        let policy = self.config.session_retry;
        let started = Instant::now();
        let mut attempt = 0u32;
        let mut last_error = String::from("no attempt made");

        loop {
            let delay = policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let config = self.config.clone();
            match tokio::task::spawn_blocking(move || open_browser(&config)).await {
                Ok(Ok(handle)) => {
                    info!(attempt, "browser session ready");
                    return Ok(handle);
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "browser session creation failed");
                    last_error = e.to_string();
                }
                Err(join_err) => {
                    last_error = format!("browser task panicked: {}", join_err);
                }
            }

            attempt += 1;
            if policy.is_exhausted(attempt, started.elapsed()) {
                return Err(BrowserError::SessionUnavailable {
                    elapsed: started.elapsed(),
                    last_error,
                });
            }
        }
    }
}

#[async_trait]
impl PageFetcher for BrowserSession {
    async fn fetch_page(
        &self,
        url: &str,
        wait_selector: &str,
        wait_timeout: Duration,
    ) -> Result<FetchedPage, BrowserError> {
        let handle = self.acquire().await?;
        let url = url.to_string();
        let selector = wait_selector.to_string();

        match tokio::task::spawn_blocking(move || {
            load_page(&handle.tab, &url, &selector, wait_timeout)
        })
        .await
        {
            Ok(result) => result,
            Err(join_err) => Err(BrowserError::Driver(format!(
                "page task panicked: {}",
                join_err
            ))),
        }
    }

    async fn release(&self) {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.take() {
            // Browser teardown closes the process / websocket; keep it off
            // the async threads.
            let _ = tokio::task::spawn_blocking(move || drop(handle)).await;
            info!("browser session released");
        }
    }
}

/// Connect to the configured remote endpoint, or launch a local headless
/// Chrome when none is set.
fn open_browser(config: &BrowserConfig) -> Result<SessionHandle, BrowserError> {
    let browser = match &config.remote_ws_url {
        Some(ws_url) => {
            info!(ws_url = %ws_url, "connecting to remote browser");
            Browser::connect(ws_url.clone()).map_err(|e| BrowserError::Driver(e.to_string()))?
        }
        None => {
            info!("launching headless Chrome");
            let options = LaunchOptions::default_builder()
                .headless(config.headless)
                .idle_browser_timeout(config.idle_timeout)
                .args(vec![
                    OsStr::new("--no-sandbox"),
                    OsStr::new("--disable-dev-shm-usage"),
                ])
                .build()
                .map_err(|e| BrowserError::Driver(e.to_string()))?;
            Browser::new(options).map_err(|e| BrowserError::Driver(e.to_string()))?
        }
    };

    let tab = browser
        .new_tab()
        .map_err(|e| BrowserError::Driver(e.to_string()))?;

    Ok(SessionHandle { browser, tab })
}

fn load_page(
    tab: &Tab,
    url: &str,
    wait_selector: &str,
    wait_timeout: Duration,
) -> Result<FetchedPage, BrowserError> {
    tab.navigate_to(url).map_err(|e| BrowserError::Navigation {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    tab.wait_until_navigated()
        .map_err(|e| BrowserError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    // Timeout here means "marker absent", not a failed page
    let marker_found = tab
        .wait_for_element_with_custom_timeout(wait_selector, wait_timeout)
        .is_ok();

    let final_url = tab.get_url();

    let html_result = tab
        .evaluate("document.documentElement.outerHTML", false)
        .map_err(|e| BrowserError::Driver(e.to_string()))?;
    let html = match html_result.value {
        Some(value) => value.as_str().unwrap_or("").to_string(),
        None => String::new(),
    };

    Ok(FetchedPage {
        final_url,
        html,
        marker_found,
    })
}
