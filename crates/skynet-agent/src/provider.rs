use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One turn of conversation history, used by providers that consume a
/// structured message list rather than a single prefixed string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A single turn sent to a provider. `messages`, when present, is consumed by
/// providers that `supports_messages()`; everything else folds `text` through
/// a plain-prefix string built by the memory service.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub text: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub messages: Option<Vec<ChatMessage>>,
}

/// Non-streaming provider response. `conversation_id` is only set by
/// providers that create or resume a server-side conversation.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub conversation_id: Option<String>,
}

/// Common interface for the four LLM-family providers (OpenAI-compatible,
/// Dify, FastGPT, Coze). `stream`'s default implementation collapses to a
/// single delta equal to the full `generate()` text — this must be preserved
/// by every caller that doesn't override it.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this provider consumes `GenerateRequest::messages` (true) or a
    /// single plain-prefixed string (false).
    fn supports_messages(&self) -> bool {
        false
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<LlmResponse, ProviderError>;

    /// Ordered list of delta strings. The default falls back to a single
    /// blocking call collapsed into one delta.
    async fn stream(&self, req: &GenerateRequest) -> Result<Vec<String>, ProviderError> {
        let resp = self.generate(req).await?;
        Ok(vec![resp.text])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("provider configuration error: {0}")]
    Config(String),
}
