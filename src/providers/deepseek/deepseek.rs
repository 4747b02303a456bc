use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::providers::traits::Generator;
use crate::retry::StatusError;

pub const DEEPSEEK_CHAT_URL: &str = "https://api.deepseek.com/v1/chat/completions";

#[derive(Clone)]
pub struct DeepSeekProvider {
    api_key: String,
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl DeepSeekProvider {
    pub fn new(api_key: &str, model: &str, temperature: f32, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing DeepSeek API key");
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build DeepSeek HTTP client")?;

        Ok(Self {
            api_key: api_key.trim().to_string(),
            client,
            endpoint: DEEPSEEK_CHAT_URL.to_string(),
            model: model.to_string(),
            temperature,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

fn extract_content(response_json: &Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(anyhow!("API returned error: {}", error));
    }

    response_json
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            let debug_json = serde_json::to_string_pretty(response_json).unwrap_or_default();
            anyhow!("Invalid response format. Response JSON: {}", debug_json)
        })
}

#[async_trait]
impl Generator for DeepSeekProvider {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&json!({
                "model": self.model,
                "messages": [
                    {
                        "role": "user",
                        "content": prompt
                    }
                ],
                "temperature": self.temperature,
                "stream": false
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(StatusError {
                service: "DeepSeek",
                status,
                body,
            }
            .into());
        }

        let response_json: Value = response.json().await?;
        extract_content(&response_json)
    }

    fn model_info(&self) -> String {
        self.model.clone()
    }
}
