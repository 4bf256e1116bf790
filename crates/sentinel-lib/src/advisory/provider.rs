//! Gemini `generateContent` adapter

use super::context::AnalysisContext;
use super::diagnosis::{build_prompt, AiProvider, ProviderError};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use tracing::debug;

/// The API key travels in this header, never in the URL
const API_KEY_HEADER: &str = "x-goog-api-key";

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Base URL, or a full `...:generateContent` URL
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_key: None,
            max_tokens: 512,
        }
    }
}

/// [`AiProvider`] backed by the Gemini REST API
pub struct GeminiProvider {
    client: Client,
    config: GeminiConfig,
}

impl GeminiProvider {
    /// The caller bounds each call with its own timeout
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(concat!("sentinel/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config
            .api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }

    fn request_url(&self) -> Result<Url, ProviderError> {
        let endpoint = self.config.endpoint.trim();
        let url = if endpoint.contains(":generateContent") {
            Url::parse(endpoint)
        } else {
            Url::parse(&format!(
                "{}/v1beta/models/{}:generateContent",
                endpoint.trim_end_matches('/'),
                self.config.model
            ))
        };
        url.map_err(|e| ProviderError::NotConfigured(format!("invalid endpoint {}: {}", endpoint, e)))
    }

    fn payload(&self, prompt: &str) -> Value {
        json!({
            "contents": [
                { "parts": [ { "text": prompt } ] }
            ],
            "generationConfig": {
                "maxOutputTokens": self.config.max_tokens
            }
        })
    }
}

/// Join the text parts of the first candidate
fn extract_text(body: &Value) -> Option<String> {
    let text = body["candidates"]
        .as_array()
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate["content"]["parts"].as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })?;

    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[async_trait]
impl AiProvider for GeminiProvider {
    async fn diagnose(&self, context: &AnalysisContext) -> Result<String, ProviderError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("missing API key".to_string()))?;
        let url = self.request_url()?;

        let prompt = build_prompt(context);
        debug!(
            container = %context.container_name,
            lines = context.lines.len(),
            model = %self.config.model,
            "Requesting diagnosis"
        );

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, api_key)
            .json(&self.payload(&prompt))
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: body.chars().take(320).collect(),
            });
        }

        let body: Value = response.json().await.map_err(|e| e.without_url())?;
        extract_text(&body).ok_or(ProviderError::EmptyResponse)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
