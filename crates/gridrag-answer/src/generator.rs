use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use gridrag_core::config::GenerationSettings;
use gridrag_core::traits::Generator;
use gridrag_core::types::GenerationRequest;

/// Generator backed by an OpenAI-compatible `/chat/completions` endpoint
/// (xAI by default).
pub struct ChatCompletionsGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: usize,
    temperature: f32,
}

impl ChatCompletionsGenerator {
    /// The API key is read from the environment variable named by
    /// `settings.api_key_env`; a missing key is reported on first use.
    pub fn from_settings(settings: &GenerationSettings) -> Self {
        let api_key = std::env::var(&settings.api_key_env).ok().filter(|k| !k.trim().is_empty());
        Self {
            client: Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| anyhow!("no API key configured"))?;
        let user = format!("Context:\n{}\nQuestion: {}", request.context, request.query);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &request.instructions },
                ChatMessage { role: "user", content: &user },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        debug!(model = %self.model, "sending chat completion request");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, body = %error_text, "chat completion API error");
            bail!("chat completion API returned {status}");
        }

        let parsed: ChatResponse = response.json().await.context("malformed chat completion response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| anyhow!("no content in chat completion response"))
    }
}
