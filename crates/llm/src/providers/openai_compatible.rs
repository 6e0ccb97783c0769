use super::{AdapterCapabilities, ProviderAdapter, ProviderReply, ProviderRequest};
use crate::errors::ProviderError;
use crate::types::{AttachmentContent, MessageRole, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Adapter for any endpoint speaking the OpenAI `/chat/completions` shape
/// (OpenAI, Groq, Azure deployments, local gateways).
///
/// Non-streaming only: streamed requests fall back to the aggregator's
/// simulated word groups.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleAdapter {
    provider_id: String,
    api_key: String,
    endpoint: String,
    client: Client,
    model_capabilities: HashMap<String, AdapterCapabilities>,
}

impl OpenAiCompatibleAdapter {
    pub fn new(
        provider_id: &str,
        api_key: &str,
        endpoint: Option<String>,
    ) -> Result<Self, ProviderError> {
        if api_key.is_empty() {
            return Err(ProviderError::auth(format!(
                "{provider_id} API key cannot be empty"
            )));
        }

        let client = Self::build_client(Duration::from_secs(60))?;

        Ok(Self {
            provider_id: provider_id.to_string(),
            api_key: api_key.to_string(),
            endpoint: endpoint.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            client,
            model_capabilities: HashMap::new(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = Self::build_client(timeout)?;
        Ok(self)
    }

    pub fn with_model(mut self, model_id: &str, capabilities: AdapterCapabilities) -> Self {
        self.model_capabilities
            .insert(model_id.to_string(), capabilities);
        self
    }

    fn build_client(timeout: Duration) -> Result<Client, ProviderError> {
        Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::internal(format!("Failed to create HTTP client: {e}")))
    }

    fn build_messages(request: &ProviderRequest) -> Vec<WireMessage> {
        let mut messages: Vec<WireMessage> = request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                }
                .to_string(),
                content: m.content.clone(),
            })
            .collect();

        for attachment in &request.attachments {
            match &attachment.content {
                AttachmentContent::Text(text) => messages.push(WireMessage {
                    role: "user".to_string(),
                    content: format!("[{}]\n{}", attachment.name, text),
                }),
                AttachmentContent::Binary(_) => {
                    debug!(
                        "Skipping binary attachment {} for {}",
                        attachment.name, request.model_id
                    );
                }
            }
        }

        messages
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn capabilities(&self, model_id: &str) -> AdapterCapabilities {
        self.model_capabilities
            .get(model_id)
            .copied()
            .map(|c| AdapterCapabilities {
                supports_streaming: false,
                ..c
            })
            .unwrap_or_default()
    }

    async fn execute(&self, request: ProviderRequest) -> Result<ProviderReply, ProviderError> {
        let start_time = Instant::now();

        let body = WireRequest {
            model: request.model_id.clone(),
            messages: Self::build_messages(&request),
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            stream: Some(false),
        };

        debug!(
            provider = %self.provider_id,
            model = %request.model_id,
            input_chars = request.input_chars(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(
                provider = %self.provider_id,
                status = status.as_u16(),
                "Chat completion failed: {}",
                error_text
            );
            return Err(ProviderError::from_status_code(
                status.as_u16(),
                format!("{} returned {}: {}", self.provider_id, status, error_text),
            ));
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(ProviderError::from_reqwest_error)?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            ProviderError::internal(format!("Empty response from {}", self.provider_id))
        })?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));

        info!(
            provider = %self.provider_id,
            model = %request.model_id,
            duration_ms = start_time.elapsed().as_millis() as u64,
            total_tokens = usage.map(|u| u.total_tokens).unwrap_or(0),
            "Chat completion received"
        );

        Ok(ProviderReply {
            text: choice.message.content,
            usage,
            finish_reason: choice.finish_reason.or_else(|| Some("stop".to_string())),
        })
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
