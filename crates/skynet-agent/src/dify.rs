use async_trait::async_trait;
use tracing::warn;

use crate::provider::{GenerateRequest, LlmProvider, LlmResponse, ProviderError};

/// Dify's blocking chat-messages endpoint. Agent-style incremental streaming
/// lives in the separate agent-handler abstraction (`agent_handler.rs`); this
/// adapter only covers the direct LLM-family call path used by the event
/// dispatcher's text turn.
pub struct DifyProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_path: String,
    user: String,
}

impl DifyProvider {
    pub fn new(api_key: String, base_url: String, user: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            chat_path: "/chat-messages".to_string(),
            user,
        }
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.chat_path)
    }
}

#[async_trait]
impl LlmProvider for DifyProvider {
    fn name(&self) -> &str {
        "dify"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<LlmResponse, ProviderError> {
        let body = serde_json::json!({
            "inputs": {},
            "query": req.text,
            "response_mode": "blocking",
            "user": req.user_id.clone().unwrap_or_else(|| self.user.clone()),
            "conversation_id": req.conversation_id.clone().unwrap_or_default(),
            "files": [],
        });

        let resp = self
            .client
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "dify api error");
            return Err(ProviderError::Api { status, message: text });
        }

        let value: serde_json::Value = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        let answer = value.get("answer").and_then(|v| v.as_str()).unwrap_or("").to_string();
        if answer.is_empty() {
            return Err(ProviderError::Config("dify returned an empty answer".to_string()));
        }

        Ok(LlmResponse {
            text: answer,
            conversation_id: extract_conversation_id(&value),
        })
    }
}

/// Tries top-level `conversation_id`/`conversationId`/`chatId`/`chat_id`,
/// then the same keys (plus `id`) nested under `data`.
pub(crate) fn extract_conversation_id(value: &serde_json::Value) -> Option<String> {
    const TOP_KEYS: [&str; 4] = ["conversation_id", "conversationId", "chatId", "chat_id"];
    for key in TOP_KEYS {
        if let Some(id) = value.get(key).and_then(|v| v.as_str()) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    if let Some(data) = value.get("data") {
        const NESTED_KEYS: [&str; 5] = ["conversation_id", "conversationId", "chatId", "chat_id", "id"];
        for key in NESTED_KEYS {
            if let Some(id) = data.get(key).and_then(|v| v.as_str()) {
                if !id.is_empty() {
                    return Some(id.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_top_level_conversation_id() {
        let value = serde_json::json!({"conversation_id": "abc"});
        assert_eq!(extract_conversation_id(&value), Some("abc".to_string()));
    }

    #[test]
    fn extracts_nested_data_id() {
        let value = serde_json::json!({"data": {"id": "xyz"}});
        assert_eq!(extract_conversation_id(&value), Some("xyz".to_string()));
    }

    #[test]
    fn returns_none_when_absent() {
        let value = serde_json::json!({});
        assert_eq!(extract_conversation_id(&value), None);
    }
}
