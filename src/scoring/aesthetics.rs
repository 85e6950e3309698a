use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::config::LlmConfig;
use crate::models::Listing;

const SYSTEM_PROMPT: &str = "You are an expert real estate agent. You are given a rental \
listing and asked to evaluate it against the following criteria:\n{criteria}\n\n\
The photos and description are provided below. Where they do not give enough information, \
use your best judgement. Where they disagree, defer to your interpretation of the photos \
and note the disagreement in the trace. Do not make up information. Note anything unusual \
about the listing, especially anything very good or bad beyond the explicit criteria.\n\
Listing Description:\n{listing_description}";

const VERDICT_INSTRUCTION: &str = "Please evaluate this listing based on the criteria. \
Respond in JSON with keys \"score\" (integer) and \"reasoning_trace\" (string).";

#[derive(Debug, Error)]
pub enum AestheticError {
    #[error("aesthetic scorer request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("aesthetic scorer answered with status {0}")]
    Status(reqwest::StatusCode),
    #[error("aesthetic scorer returned a malformed reply: {0}")]
    Malformed(String),
}

/// Judgement of a listing's look and feel from its photos and description.
/// Implementations must be safe to call per listing inside the scoring loop.
#[async_trait]
pub trait AestheticScorer: Send + Sync {
    async fn score(&self, listing: &Listing, criteria: &str)
        -> Result<(i64, String), AestheticError>;
}

/// Vision-capable chat-completions scorer. Photos travel as `image_url`
/// content parts; the reply is constrained to a JSON object.
pub struct OpenAiVisionScorer {
    http: Client,
    model: String,
    endpoint: String,
    api_key: String,
}

impl OpenAiVisionScorer {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self, AestheticError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            api_key,
        })
    }

    fn request_body(&self, listing: &Listing, criteria: &str) -> Value {
        let system_prompt = SYSTEM_PROMPT
            .replace("{criteria}", criteria)
            .replace("{listing_description}", &listing.description);

        let mut content = vec![json!({"type": "text", "text": VERDICT_INSTRUCTION})];
        for url in &listing.image_urls {
            content.push(json!({
                "type": "image_url",
                "image_url": {"url": url, "detail": "auto"}
            }));
        }

        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": content}
            ],
            "response_format": {"type": "json_object"}
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    score: i64,
    reasoning_trace: String,
}

#[async_trait]
impl AestheticScorer for OpenAiVisionScorer {
    async fn score(
        &self,
        listing: &Listing,
        criteria: &str,
    ) -> Result<(i64, String), AestheticError> {
        if listing.image_urls.is_empty() {
            return Ok((0, "No images available".to_string()));
        }

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(listing, criteria))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AestheticError::Status(response.status()));
        }
        let reply: ChatReply = response.json().await?;

        let content = reply
            .choices
            .first()
            .map(|choice| choice.message.content.trim())
            .ok_or_else(|| AestheticError::Malformed("reply carries no choices".to_string()))?;

        let verdict: Verdict = serde_json::from_str(content)
            .map_err(|e| AestheticError::Malformed(format!("{}: {:?}", e, content)))?;

        Ok((verdict.score, verdict.reasoning_trace))
    }
}

/// Stand-in when no API key is configured. Keeps the scoring pipeline whole;
/// listings still get their heuristic score.
pub struct DisabledScorer;

#[async_trait]
impl AestheticScorer for DisabledScorer {
    async fn score(
        &self,
        _listing: &Listing,
        _criteria: &str,
    ) -> Result<(i64, String), AestheticError> {
        Ok((0, "No evaluation model configured".to_string()))
    }
}

/// Scorer selection from runtime configuration: a vision scorer when an API
/// key is present, otherwise the disabled stand-in.
pub fn scorer_from_config(config: &LlmConfig) -> Arc<dyn AestheticScorer> {
    match config.api_key.as_deref() {
        Some(key) if !key.is_empty() => {
            match OpenAiVisionScorer::new(config, key.to_string()) {
                Ok(scorer) => Arc::new(scorer),
                Err(e) => {
                    warn!(error = %e, "could not build the aesthetic scorer, scoring without it");
                    Arc::new(DisabledScorer)
                }
            }
        }
        _ => Arc::new(DisabledScorer),
    }
}
