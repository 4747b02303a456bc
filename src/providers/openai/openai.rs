use anyhow::{anyhow, Context, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs, Role,
    },
    Client,
};
use async_trait::async_trait;
use std::time::Duration;

use crate::providers::traits::Generator;

#[derive(Clone)]
pub struct OpenAIProvider {
    client: Client<OpenAIConfig>,
    chat_model: String,
    temperature: f32,
}

impl OpenAIProvider {
    pub fn new(
        api_key: &str,
        api_base: &str,
        chat_model: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        let config = OpenAIConfig::new()
            .with_api_key(api_key.trim())
            .with_api_base(api_base.trim_end_matches('/'));
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        let client = Client::with_config(config).with_http_client(http_client);

        Ok(Self {
            client,
            chat_model: chat_model.to_string(),
            temperature,
        })
    }
}

#[async_trait]
impl Generator for OpenAIProvider {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .temperature(self.temperature)
            .messages(vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    role: Role::User,
                    content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                    name: None,
                },
            )])
            .build()?;

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("No response content"))
    }

    fn model_info(&self) -> String {
        self.chat_model.clone()
    }
}
