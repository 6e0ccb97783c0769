//! Provider Adapter seam.
//!
//! Everything provider-specific (wire shapes, SDK quirks, auth) stays behind
//! [`ProviderAdapter`]. The router only ever sees [`ProviderReply`],
//! [`ProviderEvent`] and [`ProviderError`].

use crate::errors::ProviderError;
use crate::types::{Attachment, ChatMessage, GenerateRequest, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[cfg(feature = "http-adapter")]
pub mod openai_compatible;

#[cfg(feature = "http-adapter")]
pub use openai_compatible::OpenAiCompatibleAdapter;

/// Normalized request handed to an adapter for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub attachments: Vec<Attachment>,
}

impl ProviderRequest {
    pub fn for_model(request: &GenerateRequest, model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            messages: request.messages.clone(),
            max_tokens: request.token_budget(),
            temperature: request.temperature,
            attachments: request.attachments.clone(),
        }
    }

    pub fn input_chars(&self) -> usize {
        self.messages
            .iter()
            .map(|m| m.content.chars().count())
            .sum::<usize>()
            + self
                .attachments
                .iter()
                .map(Attachment::text_chars)
                .sum::<usize>()
    }
}

/// Complete (non-incremental) adapter output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderReply {
    pub text: String,
    /// `None` when the provider does not report usage
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

impl ProviderReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            finish_reason: Some("stop".to_string()),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// One item of a native provider stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Delta(String),
    Done {
        finish_reason: Option<String>,
        usage: Option<TokenUsage>,
    },
    Error(ProviderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    pub supports_streaming: bool,
    pub supports_vision: bool,
    pub max_context: u32,
}

impl Default for AdapterCapabilities {
    fn default() -> Self {
        Self {
            supports_streaming: false,
            supports_vision: false,
            max_context: 8192,
        }
    }
}

/// Integration point for one upstream provider.
///
/// `execute_stream` hands back the receiving half of a channel; the adapter
/// must stop producing once the receiver is dropped, which is how consumer
/// cancellation reaches the upstream connection.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> &str;

    fn capabilities(&self, model_id: &str) -> AdapterCapabilities;

    async fn execute(&self, request: ProviderRequest) -> Result<ProviderReply, ProviderError>;

    async fn execute_stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
        Err(ProviderError::unavailable(format!(
            "streaming not supported for {}",
            request.model_id
        )))
    }
}
