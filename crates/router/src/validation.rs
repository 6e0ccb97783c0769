use llm::{AttachmentContent, GenerateError, GenerateRequest};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Ceiling on message plus text attachment characters
    pub max_input_chars: usize,
    /// Case-insensitive terms that reject a request outright
    pub denylist: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 100_000,
            denylist: Vec::new(),
        }
    }
}

/// Content checks run before any candidate is resolved.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    max_input_chars: usize,
    denylist: Vec<String>,
}

impl RequestValidator {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            max_input_chars: config.max_input_chars,
            denylist: config
                .denylist
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn validate(&self, request: &GenerateRequest) -> Result<(), GenerateError> {
        if request.caller_id.trim().is_empty() {
            return Err(GenerateError::InvalidRequest(
                "caller id is required".to_string(),
            ));
        }

        if request.messages.is_empty() {
            return Err(GenerateError::InvalidRequest(
                "message list is empty".to_string(),
            ));
        }

        if request.messages.iter().all(|m| m.content.trim().is_empty()) {
            return Err(GenerateError::InvalidRequest(
                "all messages are empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&request.temperature) {
            return Err(GenerateError::InvalidRequest(format!(
                "temperature {} is outside 0.0..=2.0",
                request.temperature
            )));
        }

        let chars = request.input_chars();
        if chars > self.max_input_chars {
            return Err(GenerateError::InvalidRequest(format!(
                "input is {} characters, limit is {}",
                chars, self.max_input_chars
            )));
        }

        if !self.denylist.is_empty() {
            let attachment_texts = request.attachments.iter().filter_map(|a| match &a.content {
                AttachmentContent::Text(text) => Some(text.as_str()),
                AttachmentContent::Binary(_) => None,
            });
            let blocked = request
                .messages
                .iter()
                .map(|m| m.content.as_str())
                .chain(attachment_texts)
                .any(|text| self.matches_denylist(text));
            if blocked {
                debug!(caller = %request.caller_id, "Request matched denylist");
                return Err(GenerateError::InvalidRequest(
                    "content is not allowed".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn matches_denylist(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.denylist.iter().any(|term| text.contains(term))
    }
}
