use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{AssistError, Result};

/// One part of a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentPart {
    Text(String),
    /// A `data:<mime>;base64,...` URL.
    ImageUrl(String),
}

impl ContentPart {
    fn to_json(&self) -> Value {
        match self {
            ContentPart::Text(text) => json!({ "type": "text", "text": text }),
            ContentPart::ImageUrl(url) => json!({
                "type": "image_url",
                "image_url": { "url": url }
            }),
        }
    }
}

/// A single chat-completion call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub content: Vec<ContentPart>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    /// Overrides the configured credential for this call only.
    pub api_key: Option<String>,
}

impl ChatRequest {
    pub fn text(
        model: impl Into<String>,
        system: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            content: vec![ContentPart::Text(prompt.into())],
            max_tokens: crate::config::DEFAULT_MAX_TOKENS,
            temperature: 0.3,
            timeout: crate::config::TEXT_TIMEOUT,
            api_key: None,
        }
    }

    pub fn with_image(mut self, data_url: impl Into<String>) -> Self {
        self.content.push(ContentPart::ImageUrl(data_url.into()));
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Chat-completions payload in the OpenAI wire format.
    pub fn payload(&self) -> Value {
        let user_content: Vec<Value> = self.content.iter().map(ContentPart::to_json).collect();
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.system },
                { "role": "user", "content": user_content }
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" }
        })
    }
}

/// Anything that can turn a [`ChatRequest`] into raw model text.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// Gateway for OpenAI-compatible `/chat/completions` endpoints.
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ModelGateway for HttpGateway {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let api_key = request.api_key.as_deref().unwrap_or(&self.api_key);

        debug!(
            model = %request.model,
            max_tokens = request.max_tokens,
            timeout_secs = request.timeout.as_secs(),
            "Calling chat completions endpoint"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .timeout(request.timeout)
            .json(&request.payload())
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() {
                    format!("Request timeout after {}s: {}", request.timeout.as_secs(), e)
                } else if e.is_connect() {
                    format!("Connection error: {}", e)
                } else {
                    e.to_string()
                };
                AssistError::gateway(message)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Model API request failed");
            return Err(AssistError::gateway(format!(
                "HTTP {}: {}",
                status,
                truncate(&body, 300)
            )));
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| AssistError::gateway(format!("Invalid response body: {}", e)))?;

        extract_content(&response_json)
    }
}

fn extract_content(response_json: &Value) -> Result<String> {
    response_json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AssistError::gateway("Invalid response format from model"))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
