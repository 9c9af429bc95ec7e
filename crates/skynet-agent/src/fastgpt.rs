use async_trait::async_trait;
use tracing::warn;

use crate::provider::{GenerateRequest, LlmProvider, LlmResponse, ProviderError};

/// FastGPT's OpenAI-shaped but blocking-only chat completions endpoint.
pub struct FastGptProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_path: String,
    uid: String,
}

impl FastGptProvider {
    pub fn new(api_key: String, base_url: String, uid: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            chat_path: "/v1/chat/completions".to_string(),
            uid,
        }
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.chat_path)
    }
}

#[async_trait]
impl LlmProvider for FastGptProvider {
    fn name(&self) -> &str {
        "fastgpt"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<LlmResponse, ProviderError> {
        let body = serde_json::json!({
            "chatId": req.conversation_id.clone().unwrap_or_default(),
            "stream": false,
            "detail": false,
            "messages": [{"role": "user", "content": req.text}],
            "customUid": req.user_id.clone().unwrap_or_else(|| self.uid.clone()),
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
            warn!(status, body = %text, "fastgpt api error");
            return Err(ProviderError::Api { status, message: text });
        }

        let value: serde_json::Value = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        let text = value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        Ok(LlmResponse { text, conversation_id: None })
    }
}
