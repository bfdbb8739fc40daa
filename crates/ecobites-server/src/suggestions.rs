//! AI donation suggestions.
//!
//! The upstream model is advisory: every failure path (no key, transport
//! error, timeout, unparseable reply) ends in the built-in default categories,
//! never in an error for the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed upstream reply: {0}")]
    Malformed(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

/// A text-completion model.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, UpstreamError>;
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    top_k: u32,
    top_p: f64,
    max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_k: 1,
            top_p: 0.8,
            max_output_tokens: 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Client for the Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| UpstreamError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            model,
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl CompletionBackend for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, UpstreamError> {
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig::default(),
        };

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: GenerateResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(e.to_string()))?;

        reply
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| UpstreamError::Malformed("reply has no text".into()))
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DonationSuggestions {
    pub donation_optimization: Vec<String>,
    pub impact_analysis: Vec<String>,
    pub seasonal_recommendations: Vec<String>,
    pub community_engagement: Vec<String>,
    pub sustainability_insights: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SmartRecommendations {
    pub needed_items: Vec<String>,
    pub timing: Vec<String>,
    pub impact_metrics: Vec<String>,
    pub collaboration: Vec<String>,
    pub efficiency: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl DonationSuggestions {
    /// Returned whole when the model gives nothing usable.
    pub fn fallback() -> Self {
        Self {
            donation_optimization: strings(&[
                "Optimize donation scheduling",
                "Focus on high-demand items",
            ]),
            impact_analysis: strings(&["Track community impact", "Measure donation effectiveness"]),
            seasonal_recommendations: strings(&["Plan for seasonal needs", "Prepare for peak times"]),
            community_engagement: strings(&[
                "Build community connections",
                "Increase local outreach",
            ]),
            sustainability_insights: strings(&["Implement sustainable practices", "Reduce waste"]),
        }
    }

    /// Build from a parsed reply, filling each missing or empty category.
    fn from_reply(reply: &Value) -> Self {
        Self {
            donation_optimization: category(reply, "donationOptimization")
                .unwrap_or_else(|| strings(&["Optimize donation scheduling"])),
            impact_analysis: category(reply, "impactAnalysis")
                .unwrap_or_else(|| strings(&["Track donation impact"])),
            seasonal_recommendations: category(reply, "seasonalRecommendations")
                .unwrap_or_else(|| strings(&["Plan for seasonal needs"])),
            community_engagement: category(reply, "communityEngagement")
                .unwrap_or_else(|| strings(&["Engage with local community"])),
            sustainability_insights: category(reply, "sustainabilityInsights")
                .unwrap_or_else(|| strings(&["Focus on sustainable practices"])),
        }
    }
}

impl SmartRecommendations {
    pub fn fallback() -> Self {
        Self {
            needed_items: strings(&["Staple pantry foods", "Seasonal clothing"]),
            timing: strings(&["Donate ahead of holiday peaks", "Schedule regular pickups"]),
            impact_metrics: strings(&["Track families reached", "Measure waste diverted"]),
            collaboration: strings(&[
                "Partner with local food banks",
                "Coordinate with community groups",
            ]),
            efficiency: strings(&["Batch pickups by area", "List items before they expire"]),
        }
    }

    fn from_reply(reply: &Value) -> Self {
        Self {
            needed_items: category(reply, "neededItems")
                .unwrap_or_else(|| strings(&["Staple pantry foods"])),
            timing: category(reply, "timing")
                .unwrap_or_else(|| strings(&["Schedule regular pickups"])),
            impact_metrics: category(reply, "impactMetrics")
                .unwrap_or_else(|| strings(&["Track families reached"])),
            collaboration: category(reply, "collaboration")
                .unwrap_or_else(|| strings(&["Partner with local food banks"])),
            efficiency: category(reply, "efficiency")
                .unwrap_or_else(|| strings(&["Batch pickups by area"])),
        }
    }
}

/// Non-empty string entries of `reply[key]`, or `None` if there are none.
fn category(reply: &Value, key: &str) -> Option<Vec<String>> {
    let items: Vec<String> = reply
        .get(key)?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}

/// Parse the outermost `{...}` span of a model reply.
fn extract_object(text: &str) -> Result<Value, UpstreamError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let span = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => text,
    };
    let value: Value =
        serde_json::from_str(span).map_err(|e| UpstreamError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(UpstreamError::Malformed("reply is not a JSON object".into()));
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct SuggestionService {
    backend: Option<Arc<dyn CompletionBackend>>,
    timeout: Duration,
}

impl SuggestionService {
    pub fn new(backend: Option<Arc<dyn CompletionBackend>>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub async fn donation_suggestions(
        &self,
        donation_type: Option<&str>,
        user_stats: &Value,
    ) -> DonationSuggestions {
        let prompt = donation_prompt(donation_type.unwrap_or("general"), user_stats);
        match self.ask(&prompt).await {
            Some(reply) => DonationSuggestions::from_reply(&reply),
            None => DonationSuggestions::fallback(),
        }
    }

    pub async fn smart_recommendations(
        &self,
        donation_history: &Value,
        community_needs: &Value,
    ) -> SmartRecommendations {
        let prompt = recommendations_prompt(donation_history, community_needs);
        match self.ask(&prompt).await {
            Some(reply) => SmartRecommendations::from_reply(&reply),
            None => SmartRecommendations::fallback(),
        }
    }

    /// Send a prompt and parse the reply; `None` on any failure.
    async fn ask(&self, prompt: &str) -> Option<Value> {
        let backend = self.backend.as_ref()?;

        let result = match tokio::time::timeout(self.timeout, backend.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(self.timeout)),
        };

        match result.and_then(|text| extract_object(&text)) {
            Ok(value) => {
                debug!("suggestions generated");
                Some(value)
            }
            Err(e) => {
                warn!(error = %e, "suggestion upstream failed, using defaults");
                None
            }
        }
    }
}

fn donation_prompt(donation_type: &str, user_stats: &Value) -> String {
    format!(
        r#"You are an AI assistant for a donation platform. Based on these statistics, provide insights in JSON format.

Input Data:
- Type: {donation_type}
- Stats: {user_stats}

Instructions:
Return ONLY a valid JSON object with exactly these keys, each an array of short strings:
"donationOptimization", "impactAnalysis", "seasonalRecommendations", "communityEngagement", "sustainabilityInsights".

Important: Respond ONLY with the JSON object, no additional text."#
    )
}

fn recommendations_prompt(donation_history: &Value, community_needs: &Value) -> String {
    format!(
        r#"Based on this donation data, suggest strategies.

History: {donation_history}
Needs: {community_needs}

Provide 2-3 points per category. Respond ONLY with a JSON object with these keys, each an array of strings:
"neededItems", "timing", "impactMetrics", "collaboration", "efficiency"."#
    )
}
