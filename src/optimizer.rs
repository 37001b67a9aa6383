//! Message optimization client.
//!
//! Thin wrapper around a Gemini-style text-generation endpoint that rewrites
//! the campaign message for engagement. Treated as an opaque, possibly-failing
//! remote call with no retry; callers keep the original message on any error.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variables checked for the API key, in order.
const API_KEY_VARS: [&str; 2] = ["SMSBLAST_API_KEY", "GEMINI_API_KEY"];

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedMessage {
    pub optimized_message: String,
    pub explanation: String,
}

pub struct OptimizerClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OptimizerClient {
    /// None when no API key is configured; the feature is simply unavailable.
    pub fn from_env() -> Option<Self> {
        let api_key = API_KEY_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())?;
        Self::new(DEFAULT_BASE_URL.to_string(), DEFAULT_MODEL.to_string(), api_key).ok()
    }

    pub fn new(base_url: String, model: String, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            model,
            api_key,
        })
    }

    /// Ask the service to rewrite the message for the given audience context.
    pub async fn optimize(&self, message: &str, context: &str) -> Result<OptimizedMessage> {
        let prompt = format!(
            "You are a professional SMS marketing expert. Optimize the following \
             message for maximum engagement and clarity. Keep it concise (under \
             160 characters if possible). Preserve any [Nome] placeholder.\n\n\
             Original Message: \"{message}\"\n\
             Target Audience/Context: \"{context}\"\n\n\
             Provide the optimized message and a brief explanation of why it works."
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "optimizedMessage": { "type": "STRING" },
                        "explanation": { "type": "STRING" }
                    },
                    "required": ["optimizedMessage", "explanation"]
                }
            }
        });

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .context("optimization request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("optimization service returned {}: {}", status, text));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .context("decode optimization response")?;
        parse_response(&payload)
    }
}

/// Extract the schema-constrained JSON text from a generateContent response.
fn parse_response(payload: &serde_json::Value) -> Result<OptimizedMessage> {
    let text = payload
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.pointer("/content/parts/0/text"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| anyhow!("no text candidate in optimization response"))?;
    serde_json::from_str(text).context("malformed optimization payload")
}
