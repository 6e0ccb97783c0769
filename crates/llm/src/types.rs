//! Request and response types shared by every routing component.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Rough token estimate: 1 token ≈ 4 characters for English.
pub fn estimate_tokens(chars: usize) -> u32 {
    (chars as f64 / 4.0).ceil() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: MessageRole::System,
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: MessageRole::User,
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.to_string(),
        }
    }
}

/// Generation-effort tier; each maps to a fixed token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Flash,
    #[default]
    Think,
    FullThink,
    UltraThink,
}

impl Mode {
    pub fn token_budget(self) -> u32 {
        match self {
            Mode::Flash => 1000,
            Mode::Think => 2000,
            Mode::FullThink => 3000,
            Mode::UltraThink => 4000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Flash => "flash",
            Mode::Think => "think",
            Mode::FullThink => "full-think",
            Mode::UltraThink => "ultra-think",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flash" => Ok(Mode::Flash),
            "think" => Ok(Mode::Think),
            "full-think" => Ok(Mode::FullThink),
            "ultra-think" => Ok(Mode::UltraThink),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Caller subscription tier, ordered from least to most entitled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanTier {
    #[default]
    Free,
    Basic,
    Pro,
    Enterprise,
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FREE" => Ok(PlanTier::Free),
            "BASIC" => Ok(PlanTier::Basic),
            "PRO" => Ok(PlanTier::Pro),
            "ENTERPRISE" => Ok(PlanTier::Enterprise),
            other => Err(format!("unknown plan tier: {other}")),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RequestCategory {
    #[default]
    Text,
    Image,
    Video,
    Audio,
}

impl RequestCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestCategory::Text => "text",
            RequestCategory::Image => "image",
            RequestCategory::Video => "video",
            RequestCategory::Audio => "audio",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreference {
    Economy,
    #[default]
    Balanced,
    Premium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum AttachmentContent {
    Text(String),
    Binary(Vec<u8>),
}

/// File or blob sent alongside the messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub content: AttachmentContent,
}

impl Attachment {
    pub fn text(name: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            mime_type: "text/plain".to_string(),
            content: AttachmentContent::Text(content.to_string()),
        }
    }

    pub fn binary(name: &str, mime_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            content: AttachmentContent::Binary(bytes),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Characters this attachment contributes to the prompt.
    pub fn text_chars(&self) -> usize {
        match &self.content {
            AttachmentContent::Text(text) => text.chars().count(),
            AttachmentContent::Binary(_) => 0,
        }
    }
}

/// Capabilities a request needs from the model serving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilityRequirements {
    pub vision: bool,
    pub streaming: bool,
    /// Minimum context window, in tokens
    pub min_context: u32,
}

/// One generation call as received from the request-handling layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub messages: Vec<ChatMessage>,
    /// Logical model id; `None` lets the optimizer choose
    pub model: Option<String>,
    pub caller_id: String,
    pub session_id: String,
    pub mode: Option<Mode>,
    /// Explicit budget; wins over the mode table
    pub max_tokens: Option<u32>,
    pub temperature: f32,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub fallback_models: Vec<String>,
    #[serde(default)]
    pub category: RequestCategory,
    #[serde(default)]
    pub quality: QualityPreference,
}

impl GenerateRequest {
    pub fn new(caller_id: &str, messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            caller_id: caller_id.to_string(),
            session_id: String::new(),
            mode: None,
            max_tokens: None,
            temperature: 0.7,
            attachments: Vec::new(),
            fallback_models: Vec::new(),
            category: RequestCategory::Text,
            quality: QualityPreference::Balanced,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn with_fallbacks(mut self, models: &[&str]) -> Self {
        self.fallback_models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = session_id.to_string();
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_category(mut self, category: RequestCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_quality(mut self, quality: QualityPreference) -> Self {
        self.quality = quality;
        self
    }

    pub fn resolved_mode(&self) -> Mode {
        self.mode.unwrap_or_default()
    }

    pub fn token_budget(&self) -> u32 {
        self.max_tokens
            .unwrap_or_else(|| self.resolved_mode().token_budget())
    }

    /// Total characters across messages and text attachments.
    pub fn input_chars(&self) -> usize {
        let messages: usize = self.messages.iter().map(|m| m.content.chars().count()).sum();
        let attachments: usize = self.attachments.iter().map(Attachment::text_chars).sum();
        messages + attachments
    }

    pub fn estimated_input_tokens(&self) -> u32 {
        estimate_tokens(self.input_chars())
    }

    pub fn requirements(&self) -> CapabilityRequirements {
        CapabilityRequirements {
            vision: self.category == RequestCategory::Image
                || self.attachments.iter().any(Attachment::is_image),
            streaming: false,
            min_context: self.estimated_input_tokens(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Character-based estimate when a provider reports no usage.
    pub fn estimated(input_chars: usize, output_chars: usize) -> Self {
        Self::new(estimate_tokens(input_chars), estimate_tokens(output_chars))
    }
}

/// Result of a non-streaming dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
    pub model_used: String,
    pub provider_used: String,
    pub usage: TokenUsage,
    pub estimated_cost: f64,
    pub processing_time_ms: u64,
    /// Index of the candidate that produced the response
    pub fallbacks_attempted: usize,
    pub cache_hit: bool,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}
