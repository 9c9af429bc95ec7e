use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::warn;

use crate::provider::{GenerateRequest, LlmProvider, LlmResponse, ProviderError};
use crate::stream::{parse_sse_line, SseLineBuffer, SseParsed};

/// Coze conversations are stateful: a conversation is created up front (or
/// reused when the caller already has one), then every turn streams from
/// `/v3/chat`. `generate()` drains that stream internally and returns the
/// concatenated text, matching the dispatcher's "Others" (plain-prefix,
/// single blocking response) branch.
pub struct CozeProvider {
    client: reqwest::Client,
    token: String,
    api_base: String,
    bot_id: String,
    user: String,
}

impl CozeProvider {
    pub fn new(token: String, api_base: String, bot_id: String, user: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            api_base,
            bot_id,
            user,
        }
    }

    fn base(&self) -> &str {
        self.api_base.trim_end_matches('/')
    }

    async fn create_conversation(&self) -> Result<String, ProviderError> {
        let resp = self
            .client
            .post(format!("{}/v1/conversation/create", self.base()))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "coze conversation create error");
            return Err(ProviderError::Api { status, message: text });
        }

        let value: serde_json::Value = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        value
            .get("data")
            .and_then(|d| d.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Config("coze did not return a conversation id".to_string()))
    }
}

#[async_trait]
impl LlmProvider for CozeProvider {
    fn name(&self) -> &str {
        "coze"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<LlmResponse, ProviderError> {
        let conversation_id = match &req.conversation_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => self.create_conversation().await?,
        };

        let user_id = req.user_id.clone().unwrap_or_else(|| self.user.clone());
        let body = serde_json::json!({
            "bot_id": self.bot_id,
            "user_id": user_id,
            "stream": true,
            "auto_save_history": true,
            "additional_messages": [{
                "role": "user",
                "content": req.text,
                "content_type": "text",
            }],
        });

        let resp = self
            .client
            .post(format!("{}/v3/chat?conversation_id={}", self.base(), conversation_id))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "coze chat api error");
            return Err(ProviderError::Api { status, message: text });
        }

        let mut text = String::new();
        let mut current_event: Option<String> = None;
        let mut lines = SseLineBuffer::new();
        let mut byte_stream = resp.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            for line in lines.push(&chunk) {
                match parse_sse_line(&line) {
                    Some(SseParsed::Event(name)) => current_event = Some(name),
                    Some(SseParsed::Data(data)) => {
                        if current_event.as_deref() == Some("conversation.message.delta") {
                            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&data) {
                                if let Some(content) = value.get("content").and_then(|v| v.as_str()) {
                                    text.push_str(content);
                                }
                            }
                        }
                    }
                    None => {}
                }
            }
        }

        Ok(LlmResponse {
            text,
            conversation_id: Some(conversation_id),
        })
    }
}
