//! The agent-handler abstraction: specialized incremental streaming for
//! agent-style upstream platforms, exposed to HTTP clients over SSE. This is
//! a separate code path from `provider.rs`'s `LlmProvider` (used by the event
//! dispatcher's `input.text` turn) — it backs the standalone agent-streaming
//! HTTP endpoint and speaks a richer per-family protocol (conversation
//! creation/reuse, `message.think` reasoning deltas, a `conversation.id`
//! event).

use async_trait::async_trait;
use serde::Serialize;
use skynet_core::engine::EngineRuntimeConfig;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::provider::ProviderError;
use crate::stream::{parse_sse_line, SseBlockBuffer, SseLineBuffer, SseParsed};

/// Per-call context: the resolved engine runtime config plus any caller
/// overrides layered on top of it (the HTTP endpoint's `config` body).
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub runtime: EngineRuntimeConfig,
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl AgentContext {
    pub fn new(runtime: EngineRuntimeConfig) -> Self {
        Self { runtime, params: serde_json::Map::new() }
    }

    fn path(&self, key: &str, default: &str) -> String {
        self.runtime.paths.get(key).cloned().unwrap_or_else(|| default.to_string())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.runtime.base_url.trim_end_matches('/'), path)
    }
}

/// One envelope-like record produced by an agent handler's stream:
/// `{event, data}`, framed as SSE by `sse_event`/`sse_error`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    pub event: String,
    pub data: serde_json::Value,
}

impl AgentEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self { event: "message.delta".to_string(), data: serde_json::json!({"text": text.into()}) }
    }
    pub fn think(text: impl Into<String>) -> Self {
        Self { event: "message.think".to_string(), data: serde_json::json!({"text": text.into()}) }
    }
    pub fn conversation_id(id: impl Into<String>) -> Self {
        Self { event: "conversation.id".to_string(), data: serde_json::json!({"conversationId": id.into()}) }
    }
    pub fn done() -> Self {
        Self { event: "message.done".to_string(), data: serde_json::json!({}) }
    }
    pub fn error(message: impl Into<String>) -> Self {
        Self { event: "error".to_string(), data: serde_json::json!({"message": message.into()}) }
    }
}

/// Render one event as an `event: <name>\ndata: <json>\n\n` SSE frame.
pub fn sse_event(event: &AgentEvent) -> String {
    format!("event: {}\ndata: {}\n\n", event.event, event.data)
}

/// A bare `error` SSE frame, for the endpoint's catch-all failure path.
pub fn sse_error(message: &str) -> String {
    sse_event(&AgentEvent::error(message))
}

/// Coerce the user's turn text out of an arbitrary request `data` object: a
/// non-empty top-level `text` wins; otherwise scan `messages` for the last
/// `role == "user"` entry; otherwise fall back to the very last message.
pub fn coerce_text(data: &serde_json::Value) -> Option<String> {
    if let Some(text) = data.get("text").and_then(|v| v.as_str()) {
        if !text.trim().is_empty() {
            return Some(text.to_string());
        }
    }
    let messages = data.get("messages")?.as_array()?;
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"));
    let chosen = last_user.or_else(|| messages.last())?;
    chosen.get("content").and_then(|v| v.as_str()).map(str::to_string)
}

/// Same polymorphism pattern as `LlmProvider`: create (or reuse) a
/// conversation, then stream incremental events for one turn. Every stream
/// terminates with `message.done`.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn create_conversation(&self, ctx: &AgentContext) -> Result<Option<String>, ProviderError>;
    async fn stream(
        &self,
        ctx: &AgentContext,
        text: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> Result<(), ProviderError>;
}

fn is_uuid(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}

/// Tries top-level `conversation_id`/`conversationId`, then nested `data.id`,
/// then top-level `id`.
pub(crate) fn extract_conversation_id(value: &serde_json::Value) -> Option<String> {
    for key in ["conversation_id", "conversationId"] {
        if let Some(id) = value.get(key).and_then(|v| v.as_str()) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    if let Some(id) = value.get("data").and_then(|d| d.get("id")).and_then(|v| v.as_str()) {
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    value.get("id").and_then(|v| v.as_str()).map(str::to_string)
}

// ---------------------------------------------------------------------
// Dify
// ---------------------------------------------------------------------

pub struct DifyAgentHandler {
    client: reqwest::Client,
}

impl Default for DifyAgentHandler {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

fn coerce_dify_conversation_id(raw: Option<&str>) -> String {
    match raw {
        Some(id) if is_uuid(id) => id.to_string(),
        _ => String::new(),
    }
}

#[async_trait]
impl AgentHandler for DifyAgentHandler {
    /// Conversation creation resolves with a two-level fallback:
    /// `paths.conversation`, else `paths.chat`, else `/chat-messages`.
    async fn create_conversation(&self, ctx: &AgentContext) -> Result<Option<String>, ProviderError> {
        let path = ctx
            .runtime
            .paths
            .get("conversation")
            .or_else(|| ctx.runtime.paths.get("chat"))
            .cloned()
            .unwrap_or_else(|| "/chat-messages".to_string());

        let body = serde_json::json!({
            "inputs": {},
            "query": "",
            "response_mode": "blocking",
            "user": ctx.params.get("user").and_then(|v| v.as_str()).unwrap_or("whale"),
        });

        let resp = self
            .client
            .post(ctx.url(&path))
            .bearer_auth(ctx.runtime.api_key.clone().unwrap_or_default())
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let value: serde_json::Value = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        let id = extract_conversation_id(&value);
        Ok(id.map(|id| coerce_dify_conversation_id(Some(&id))).filter(|id| !id.is_empty()))
    }

    /// Ordinary streaming resolves with a single-level fallback:
    /// `paths.chat`, else `/chat-messages`. Dify's own SSE protocol embeds
    /// `event`/`answer` as JSON fields inside each `data:` line rather than
    /// using a standard SSE `event:` line, so gating reads those fields
    /// directly; delta extraction is substring-based (`"message"` appearing
    /// in the event name). Unlike Coze, the conversation id isn't known up
    /// front: the first chunk that carries one emits `conversation.id`
    /// mid-stream, before any delta.
    async fn stream(
        &self,
        ctx: &AgentContext,
        text: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> Result<(), ProviderError> {
        use futures_util::StreamExt;

        let path = ctx.path("chat", "/chat-messages");
        let conversation_id = coerce_dify_conversation_id(
            ctx.params.get("conversation_id").and_then(|v| v.as_str()),
        );
        let body = serde_json::json!({
            "inputs": {},
            "query": text,
            "response_mode": "streaming",
            "user": ctx.params.get("user").and_then(|v| v.as_str()).unwrap_or("whale"),
            "conversation_id": conversation_id,
            "files": [],
        });

        let resp = self
            .client
            .post(ctx.url(&path))
            .bearer_auth(ctx.runtime.api_key.clone().unwrap_or_default())
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!(status, body = %body, "dify agent stream error");
            return Err(ProviderError::Api { status, message: body });
        }

        let mut lines = SseLineBuffer::new();
        let mut byte_stream = resp.bytes_stream();
        let mut current_conversation_id: Option<String> = None;
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            for line in lines.push(&chunk) {
                let Some(SseParsed::Data(data)) = parse_sse_line(&line) else { continue };
                if data == "[DONE]" {
                    continue;
                }
                let Ok(value) = serde_json::from_str::<serde_json::Value>(&data) else { continue };

                if current_conversation_id.is_none() {
                    if let Some(id) = value.get("conversation_id").and_then(|v| v.as_str()) {
                        if !id.is_empty() {
                            current_conversation_id = Some(id.to_string());
                            if tx.send(AgentEvent::conversation_id(id)).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }

                let event_name = value.get("event").and_then(|v| v.as_str()).unwrap_or("");
                let answer = value.get("answer").and_then(|v| v.as_str());
                if let Some(answer) = answer {
                    if !answer.is_empty() && event_name.contains("message") {
                        if tx.send(AgentEvent::delta(answer)).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
        let _ = tx.send(AgentEvent::done()).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Coze
// ---------------------------------------------------------------------

pub struct CozeAgentHandler {
    client: reqwest::Client,
}

impl Default for CozeAgentHandler {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[async_trait]
impl AgentHandler for CozeAgentHandler {
    async fn create_conversation(&self, ctx: &AgentContext) -> Result<Option<String>, ProviderError> {
        let resp = self
            .client
            .post(ctx.url("/v1/conversation/create"))
            .bearer_auth(ctx.runtime.api_key.clone().unwrap_or_default())
            .json(&serde_json::json!({}))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message: body });
        }
        let value: serde_json::Value = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(extract_conversation_id(&value))
    }

    /// Conversation creation is mandatory here: a failure aborts the turn.
    /// The `conversation.id` event is emitted before streaming begins, since
    /// the id is known up front (unlike Dify's mid-stream discovery). Delta
    /// gating is exact-equality on `conversation.message.delta`; each
    /// qualifying chunk may independently carry `reasoning_content`
    /// (`message.think`) and `content` (`message.delta`).
    async fn stream(
        &self,
        ctx: &AgentContext,
        text: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> Result<(), ProviderError> {
        use futures_util::StreamExt;

        let conversation_id = match ctx.params.get("conversation_id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self
                .create_conversation(ctx)
                .await?
                .ok_or_else(|| ProviderError::Config("coze did not return a conversation id".to_string()))?,
        };
        let _ = tx.send(AgentEvent::conversation_id(conversation_id.clone())).await;

        let user_id = ctx.params.get("user_id").and_then(|v| v.as_str()).unwrap_or("whale");
        let bot_id = ctx.params.get("bot_id").and_then(|v| v.as_str()).unwrap_or_default();
        let body = serde_json::json!({
            "bot_id": bot_id,
            "user_id": user_id,
            "stream": true,
            "auto_save_history": true,
            "additional_messages": [{"role": "user", "content": text, "content_type": "text"}],
        });

        let resp = self
            .client
            .post(ctx.url(&format!("/v3/chat?conversation_id={conversation_id}")))
            .bearer_auth(ctx.runtime.api_key.clone().unwrap_or_default())
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message: body });
        }

        let mut lines = SseLineBuffer::new();
        let mut current_event: Option<String> = None;
        let mut byte_stream = resp.bytes_stream();
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            for line in lines.push(&chunk) {
                match parse_sse_line(&line) {
                    Some(SseParsed::Event(name)) => current_event = Some(name),
                    Some(SseParsed::Data(data)) => {
                        if current_event.as_deref() != Some("conversation.message.delta") {
                            continue;
                        }
                        let Ok(value) = serde_json::from_str::<serde_json::Value>(&data) else { continue };
                        if let Some(reasoning) = value.get("reasoning_content").and_then(|v| v.as_str()) {
                            if !reasoning.is_empty() && tx.send(AgentEvent::think(reasoning)).await.is_err() {
                                return Ok(());
                            }
                        }
                        if let Some(content) = value.get("content").and_then(|v| v.as_str()) {
                            if !content.is_empty() && tx.send(AgentEvent::delta(content)).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    None => {}
                }
            }
        }
        let _ = tx.send(AgentEvent::done()).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------
// FastGPT
// ---------------------------------------------------------------------

pub struct FastGptAgentHandler {
    client: reqwest::Client,
}

impl Default for FastGptAgentHandler {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

/// 8 random bytes, hex-encoded — routine behavior when the caller doesn't
/// care about conversation continuity, not an error path.
fn random_fastgpt_chat_id() -> String {
    let bytes: [u8; 8] = rand_bytes();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn rand_bytes() -> [u8; 8] {
    let mut bytes = [0u8; 8];
    let seed = Uuid::new_v4();
    bytes.copy_from_slice(&seed.as_bytes()[..8]);
    bytes
}

#[async_trait]
impl AgentHandler for FastGptAgentHandler {
    async fn create_conversation(&self, ctx: &AgentContext) -> Result<Option<String>, ProviderError> {
        let explicit = ctx.params.get("conversation_id").and_then(|v| v.as_str());
        match explicit {
            Some(id) if !id.is_empty() => Ok(Some(id.to_string())),
            _ => Ok(Some(random_fastgpt_chat_id())),
        }
    }

    /// The SSE loop explicitly skips the `[DONE]` sentinel line rather than
    /// terminating on it; termination is stream-close.
    async fn stream(
        &self,
        ctx: &AgentContext,
        text: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> Result<(), ProviderError> {
        use futures_util::StreamExt;

        let chat_id = match ctx.params.get("conversation_id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => random_fastgpt_chat_id(),
        };
        let path = ctx.path("chat", "/v1/chat/completions");
        let body = serde_json::json!({
            "chatId": chat_id,
            "stream": true,
            "detail": false,
            "messages": [{"role": "user", "content": text}],
            "customUid": ctx.params.get("uid").and_then(|v| v.as_str()).unwrap_or("whale"),
        });

        let resp = self
            .client
            .post(ctx.url(&path))
            .bearer_auth(ctx.runtime.api_key.clone().unwrap_or_default())
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message: body });
        }

        let mut lines = SseLineBuffer::new();
        let mut byte_stream = resp.bytes_stream();
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            for line in lines.push(&chunk) {
                let Some(SseParsed::Data(data)) = parse_sse_line(&line) else { continue };
                if data == "[DONE]" {
                    continue;
                }
                let Ok(value) = serde_json::from_str::<serde_json::Value>(&data) else { continue };
                let content = value
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .and_then(|c| c.get("delta"))
                    .and_then(|d| d.get("content"))
                    .and_then(|v| v.as_str());
                if let Some(content) = content {
                    if !content.is_empty() && tx.send(AgentEvent::delta(content)).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
        let _ = tx.send(AgentEvent::done()).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Custom
// ---------------------------------------------------------------------

pub struct CustomAgentHandler {
    client: reqwest::Client,
}

impl Default for CustomAgentHandler {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

/// Maps a raw (possibly aliased) event name plus its data payload to a
/// normalized `AgentEvent`, falling back to `message.delta` for any
/// unrecognized event name that still carries textual content.
fn normalize_custom_event(event_name: Option<&str>, data: &str) -> Option<AgentEvent> {
    let value: serde_json::Value = serde_json::from_str(data).unwrap_or(serde_json::Value::Null);
    let text = value
        .get("text")
        .or_else(|| value.get("content"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| data.to_string());

    match event_name.unwrap_or("") {
        "message.delta" | "delta" | "message" => Some(AgentEvent::delta(text)),
        "message.think" => Some(AgentEvent::think(text)),
        "message.done" | "done" | "final" => Some(AgentEvent::done()),
        "conversation.id" => Some(AgentEvent::conversation_id(text)),
        "error" => Some(AgentEvent::error(text)),
        "" => None,
        _ if !text.trim().is_empty() => Some(AgentEvent::delta(text)),
        _ => None,
    }
}

#[async_trait]
impl AgentHandler for CustomAgentHandler {
    /// Only attempts conversation creation if an explicit `conversation`
    /// path has been configured for the engine; the other three families
    /// have hardcoded default paths and always attempt it.
    async fn create_conversation(&self, ctx: &AgentContext) -> Result<Option<String>, ProviderError> {
        let Some(path) = ctx.runtime.paths.get("conversation").cloned() else {
            return Ok(None);
        };
        let resp = self
            .client
            .post(ctx.url(&path))
            .bearer_auth(ctx.runtime.api_key.clone().unwrap_or_default())
            .json(&serde_json::json!({}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let value: serde_json::Value = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(extract_conversation_id(&value))
    }

    /// Speaks a subset of this project's own SSE protocol directly; the
    /// framer accumulates multi-line `data:` blocks per blank-line-terminated
    /// event rather than one line per event.
    async fn stream(
        &self,
        ctx: &AgentContext,
        text: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> Result<(), ProviderError> {
        use futures_util::StreamExt;

        let path = ctx.path("chat", "/chat");
        let body = serde_json::json!({
            "text": text,
            "conversation_id": ctx.params.get("conversation_id"),
        });

        let resp = self
            .client
            .post(ctx.url(&path))
            .bearer_auth(ctx.runtime.api_key.clone().unwrap_or_default())
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message: body });
        }

        let mut blocks = SseBlockBuffer::new();
        let mut byte_stream = resp.bytes_stream();
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            for block in blocks.push(&chunk) {
                if let Some(event) = normalize_custom_event(block.event.as_deref(), &block.data) {
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
        let _ = tx.send(AgentEvent::done()).await;
        Ok(())
    }
}

/// Resolves the concrete handler for an engine's `engine_type`.
pub fn build_agent_handler(engine_type: &str) -> Result<Box<dyn AgentHandler>, ProviderError> {
    match engine_type {
        "dify" => Ok(Box::new(DifyAgentHandler::default())),
        "coze" => Ok(Box::new(CozeAgentHandler::default())),
        "fastgpt" => Ok(Box::new(FastGptAgentHandler::default())),
        "custom" => Ok(Box::new(CustomAgentHandler::default())),
        other => Err(ProviderError::Config(format!("unknown agent engine type: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_text_prefers_top_level_text() {
        let data = serde_json::json!({"text": "hello"});
        assert_eq!(coerce_text(&data), Some("hello".to_string()));
    }

    #[test]
    fn coerce_text_falls_back_to_last_user_message() {
        let data = serde_json::json!({
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": "second"},
            ]
        });
        assert_eq!(coerce_text(&data), Some("second".to_string()));
    }

    #[test]
    fn coerce_dify_conversation_id_rejects_non_uuid() {
        assert_eq!(coerce_dify_conversation_id(Some("not-a-uuid")), "");
        let uuid = Uuid::new_v4().to_string();
        assert_eq!(coerce_dify_conversation_id(Some(&uuid)), uuid);
    }

    #[test]
    fn normalize_custom_event_falls_back_to_delta_for_unknown_name() {
        let event = normalize_custom_event(Some("weird.name"), r#"{"text":"hi"}"#).unwrap();
        assert_eq!(event.event, "message.delta");
    }

    #[test]
    fn normalize_custom_event_maps_known_aliases() {
        let event = normalize_custom_event(Some("conversation.id"), r#"{"text":"abc"}"#).unwrap();
        assert_eq!(event.event, "conversation.id");
    }

    #[test]
    fn build_agent_handler_rejects_unknown_engine_type() {
        assert!(build_agent_handler("unknown").is_err());
    }
}
