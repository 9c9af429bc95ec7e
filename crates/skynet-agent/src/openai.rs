use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{GenerateRequest, LlmProvider, LlmResponse, ProviderError};
use crate::stream::{parse_sse_line, SseLineBuffer, SseParsed};

/// OpenAI-compatible chat completions. Used both for the real OpenAI API and
/// for any third-party endpoint that mirrors its wire shape.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_path: String,
    model: String,
    temperature: f64,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: String, model: String, temperature: f64) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            chat_path: "/chat/completions".to_string(),
            model,
            temperature,
        }
    }

    pub fn with_path(mut self, chat_path: impl Into<String>) -> Self {
        self.chat_path = chat_path.into();
        self
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.chat_path)
    }

    fn build_messages(&self, req: &GenerateRequest) -> Vec<serde_json::Value> {
        match &req.messages {
            Some(messages) => messages
                .iter()
                .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
                .collect(),
            None => vec![serde_json::json!({"role": "user", "content": req.text})],
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn supports_messages(&self) -> bool {
        true
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<LlmResponse, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": self.build_messages(req),
            "temperature": self.temperature,
            "stream": false,
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
            warn!(status, body = %text, "openai api error");
            return Err(ProviderError::Api { status, message: text });
        }

        let api_resp: ApiResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        let text = api_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(LlmResponse { text, conversation_id: None })
    }

    /// Streaming collects `choices[0].delta.content` per chunk; if the
    /// upstream never produces a delta, fall back to a blocking call and
    /// yield its full text as a single chunk.
    async fn stream(&self, req: &GenerateRequest) -> Result<Vec<String>, ProviderError> {
        use futures_util::StreamExt;

        let body = serde_json::json!({
            "model": self.model,
            "messages": self.build_messages(req),
            "temperature": self.temperature,
            "stream": true,
        });

        debug!(model = %self.model, "streaming openai chat completion");

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
            warn!(status, body = %text, "openai streaming api error");
            return Err(ProviderError::Api { status, message: text });
        }

        let mut deltas = Vec::new();
        let mut lines = SseLineBuffer::new();
        let mut byte_stream = resp.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            for line in lines.push(&chunk) {
                let Some(SseParsed::Data(data)) = parse_sse_line(&line) else {
                    continue;
                };
                if data == "[DONE]" {
                    break;
                }
                let Ok(parsed) = serde_json::from_str::<StreamChunk>(&data) else {
                    continue;
                };
                for choice in parsed.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            deltas.push(content);
                        }
                    }
                }
            }
        }

        if deltas.is_empty() {
            let resp = self.generate(req).await?;
            return Ok(vec![resp.text]);
        }
        Ok(deltas)
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
