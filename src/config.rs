use std::path::PathBuf;
use std::time::Duration;

use crate::browser::RetryPolicy;

/// Runtime settings, resolved once at startup. Every knob is overridable
/// through the environment and falls back to a sensible default.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    pub browser: BrowserConfig,
    /// Delay inserted between search-page loads
    pub page_delay: Duration,
    /// Bounded wait for a results marker / mandatory anchor to appear
    pub element_timeout: Duration,
    pub scheduler: SchedulerConfig,
    pub llm: LlmConfig,
}

/// How to obtain a browser: connect to a remote DevTools endpoint when a
/// websocket URL is configured, otherwise launch a local headless Chrome.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub remote_ws_url: Option<String>,
    pub headless: bool,
    /// Keep-alive for the local browser process between page loads
    pub idle_timeout: Duration,
    pub session_retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the scheduler looks for a stale job
    pub interval: Duration,
    /// Minimum age of `updated_at` before a job is eligible to run again
    pub staleness: Duration,
}

/// Aesthetic-scorer endpoint settings (OpenAI-compatible chat completions)
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub request_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        fn parse_bool(key: &str, default: bool) -> bool {
            match std::env::var(key) {
                Ok(val) => matches!(val.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
                Err(_) => default,
            }
        }

        fn parse_u64(key: &str, default: u64) -> u64 {
            std::env::var(key)
                .ok()
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(default)
        }

        fn provider_defaults(provider: &str) -> (String, String) {
            match provider.to_ascii_lowercase().as_str() {
                "openrouter" => (
                    "openai/gpt-4o-mini".into(),
                    "https://openrouter.ai/api/v1/chat/completions".into(),
                ),
                _ => (
                    "gpt-4o-mini".into(),
                    "https://api.openai.com/v1/chat/completions".into(),
                ),
            }
        }

        fn provider_api_key(provider: &str) -> Option<String> {
            match provider.to_ascii_lowercase().as_str() {
                "openrouter" => std::env::var("OPENROUTER_API_KEY").ok(),
                _ => std::env::var("OPENAI_API_KEY").ok(),
            }
        }

        let database_path = std::env::var("RENT_SCOUT_DB")
            .unwrap_or_else(|_| "rent_scout.sqlite".into())
            .into();

        let browser = BrowserConfig {
            remote_ws_url: std::env::var("RENT_SCOUT_BROWSER_WS").ok(),
            headless: parse_bool("RENT_SCOUT_HEADLESS", true),
            idle_timeout: Duration::from_secs(parse_u64("RENT_SCOUT_BROWSER_IDLE_SECS", 300)),
            session_retry: RetryPolicy::new(
                parse_u64("RENT_SCOUT_SESSION_ATTEMPTS", 5) as u32,
                Duration::from_millis(parse_u64("RENT_SCOUT_SESSION_RETRY_DELAY_MS", 3000)),
                Duration::from_secs(parse_u64("RENT_SCOUT_SESSION_RETRY_SECS", 12)),
            ),
        };

        let scheduler = SchedulerConfig {
            interval: Duration::from_secs(parse_u64("RENT_SCOUT_SCHEDULER_INTERVAL_SECS", 1800)),
            staleness: Duration::from_secs(parse_u64("RENT_SCOUT_STALENESS_HOURS", 24) * 3600),
        };

        let provider = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".into());
        let (default_model, default_endpoint) = provider_defaults(&provider);
        let llm = LlmConfig {
            api_key: std::env::var("LLM_API_KEY")
                .ok()
                .or_else(|| provider_api_key(&provider)),
            model: std::env::var("LLM_MODEL").unwrap_or(default_model),
            endpoint: std::env::var("LLM_ENDPOINT").unwrap_or(default_endpoint),
            request_timeout: Duration::from_secs(parse_u64("LLM_TIMEOUT_SECS", 60)),
        };

        AppConfig {
            database_path,
            browser,
            page_delay: Duration::from_millis(parse_u64("RENT_SCOUT_PAGE_DELAY_MS", 200)),
            element_timeout: Duration::from_secs(parse_u64("RENT_SCOUT_ELEMENT_TIMEOUT_SECS", 10)),
            scheduler,
            llm,
        }
    }
}
