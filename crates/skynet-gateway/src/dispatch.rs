use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use skynet_agent::{build_llm_provider, build_provider_config, GenerateRequest, LlmProvider, ProviderError};
use skynet_memory::{MemoryScope, SummaryProvider};
use skynet_protocol::{make_event, Envelope, MakeOpts};

use crate::app::AppState;

/// Routes a normalized inbound event to its handler and returns the
/// response events to broadcast. An unrecognized type yields no response,
/// matching the reference dispatcher's `self._handlers.get(...)` miss.
pub async fn dispatch(state: &AppState, event: &Envelope) -> Vec<Value> {
    match skynet_protocol::normalize_event_type(&event.event_type) {
        "session.start" => handle_session_start(state, event),
        "input.text" => handle_input_text(state, event).await,
        "input.voice.start" | "input.voice.end" => Vec::new(),
        "input.voice.chunk" => vec![error_event(None, "ASR not configured")],
        "input.interrupt" => {
            let session_id = event.session_id.clone();
            vec![
                make_event("output.speech.end", json!({}), opts(session_id.clone())),
                make_event("tts.end", json!({}), opts(session_id)),
            ]
        }
        _ => Vec::new(),
    }
}

fn opts(session_id: Option<String>) -> MakeOpts {
    match session_id {
        Some(sid) if !sid.is_empty() => MakeOpts::with_session(sid),
        _ => MakeOpts::default(),
    }
}

fn error_event(session_id: Option<String>, message: &str) -> Value {
    make_event("error", json!({"message": message}), opts(session_id))
}

fn handle_session_start(state: &AppState, event: &Envelope) -> Vec<Value> {
    let session_id = event.resolve_session_id("default");
    let user_id = event.data_str("user_id").or_else(|| event.data_str("userId"));
    let profile_id = event.data_str("profile_id").or_else(|| event.data_str("profileId"));

    state.sessions.get_or_create(&session_id, user_id, profile_id);

    if let Some(meta) = extract_session_meta(event) {
        state.sessions.set_session_meta(&session_id, &meta);
    }
    if let Some(prompt) = extract_developer_prompt(event) {
        state.sessions.set_developer_prompt(&session_id, &prompt);
    }

    vec![make_event(
        "session.started",
        json!({"session_id": session_id, "profile_id": profile_id}),
        MakeOpts::with_session(session_id.clone()),
    )]
}

async fn handle_input_text(state: &AppState, event: &Envelope) -> Vec<Value> {
    let text = event.data_str("text").unwrap_or("");
    if text.is_empty() {
        return vec![error_event(event.session_id.clone(), "input.text requires a text field")];
    }

    let session_id = event.resolve_session_id("default");
    let user_id = event.data_str("user_id").or_else(|| event.data_str("userId"));
    let profile_id = event.data_str("profile_id").or_else(|| event.data_str("profileId"));
    let session = state.sessions.get_or_create(&session_id, user_id, profile_id);

    let session_meta = extract_session_meta(event).or_else(|| state.sessions.get_session_meta(&session_id));
    if let Some(ref meta) = session_meta {
        state.sessions.set_session_meta(&session_id, meta);
    }
    let developer_prompt = extract_developer_prompt(event).or_else(|| state.sessions.get_developer_prompt(&session_id));
    if let Some(ref prompt) = developer_prompt {
        state.sessions.set_developer_prompt(&session_id, prompt);
    }

    let provider_config = build_provider_config(&event_payload(event), &state.config);
    let provider_id = provider_config.provider_id.clone();
    let conversation_id = state.sessions.get_conversation_id(&session_id, &provider_id);

    let scope = MemoryScope::new(
        session_id.clone(),
        session.user_id.clone().unwrap_or_default(),
        session.profile_id.clone().unwrap_or_default(),
    );

    let memory_context = match state.memory.build_context(&scope, true) {
        Ok(context) => context,
        Err(err) => return vec![error_event(Some(session_id), &format!("LLM request failed: {err}"))],
    };

    let provider: Arc<dyn LlmProvider> = match build_llm_provider(&provider_config, &state.config) {
        Ok(provider) => provider,
        Err(ProviderError::Config(message)) => return vec![error_event(Some(session_id), &message)],
        Err(other) => return vec![error_event(Some(session_id), &format!("LLM request failed: {other}"))],
    };

    // Messages-capable providers (OpenAI-family) stream structured turns and
    // never rebind the conversation id. Providers that take a single plain
    // prompt (Dify/FastGPT/Coze) make a single non-streaming call and may
    // hand back a server-side conversation id to persist on the session.
    let (deltas, response_text, response_conversation_id) = if provider.supports_messages() {
        let messages = state.memory.build_messages(
            state.config.llm_system_prompt.as_deref(),
            developer_prompt.as_deref(),
            session_meta.as_deref(),
            &memory_context,
            text,
        );
        let request = GenerateRequest {
            text: text.to_string(),
            user_id: user_id.map(str::to_string),
            conversation_id: conversation_id.clone(),
            messages: Some(
                messages
                    .into_iter()
                    .map(|m| skynet_agent::ChatMessage { role: m.role, content: m.content })
                    .collect(),
            ),
        };
        let deltas = match provider.stream(&request).await {
            Ok(deltas) => deltas,
            Err(ProviderError::Config(message)) => return vec![error_event(Some(session_id), &message)],
            Err(other) => return vec![error_event(Some(session_id), &format!("LLM request failed: {other}"))],
        };
        let response_text = deltas.join("");
        (deltas, response_text, conversation_id.clone())
    } else {
        let prompt = state
            .memory
            .build_prompt(developer_prompt.as_deref(), session_meta.as_deref(), &memory_context, text);
        let request = GenerateRequest {
            text: prompt,
            user_id: user_id.map(str::to_string),
            conversation_id: conversation_id.clone(),
            messages: None,
        };
        let response = match provider.generate(&request).await {
            Ok(response) => response,
            Err(ProviderError::Config(message)) => return vec![error_event(Some(session_id), &message)],
            Err(other) => return vec![error_event(Some(session_id), &format!("LLM request failed: {other}"))],
        };
        let response_conversation_id = response.conversation_id.clone().or_else(|| conversation_id.clone());
        (vec![response.text.clone()], response.text, response_conversation_id)
    };

    if let Some(ref new_conversation_id) = response_conversation_id {
        if Some(new_conversation_id.as_str()) != conversation_id.as_deref() {
            state.sessions.set_conversation_id(&session_id, &provider_id, new_conversation_id);
        }
    }

    state.memory.record_message(&scope, "user", text).ok();
    state.memory.record_message(&scope, "assistant", &response_text).ok();

    let summary_provider = LlmSummaryProvider(provider.clone());
    if let Err(err) = state.memory.maybe_summarize(&scope, Some(&summary_provider)).await {
        tracing::warn!(error = %err, "memory summarization failed");
    }

    let mut events = Vec::new();
    for delta in deltas.iter().filter(|d| !d.is_empty()) {
        events.push(make_event("output.chat.delta", json!({"text": delta}), opts(Some(session_id.clone()))));
        events.push(make_event("llm.delta", json!({"text": delta}), opts(Some(session_id.clone()))));
    }

    let final_payload = json!({"text": response_text, "tokens": response_text.split_whitespace().count()});
    events.push(make_event("output.chat.complete", final_payload.clone(), opts(Some(session_id.clone()))));
    events.push(make_event("llm.final", final_payload, opts(Some(session_id.clone()))));
    events.push(make_event(
        "memory.write",
        json!({"kind": "chat", "content": text, "tags": ["user"]}),
        opts(Some(session_id)),
    ));

    events
}

fn event_payload(event: &Envelope) -> Value {
    Value::Object(event.data.clone())
}

fn extract_session_meta(event: &Envelope) -> Option<String> {
    for key in ["session_meta", "sessionMeta", "session_metadata", "sessionMetadata", "metadata", "meta"] {
        if let Some(value) = event.data.get(key) {
            if let Some(text) = coerce_session_meta(value) {
                return Some(text);
            }
        }
    }
    None
}

fn coerce_session_meta(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => non_empty(s.trim().to_string()),
        Value::Object(map) => {
            let joined = map
                .iter()
                .map(|(k, v)| format!("{k}: {}", plain(v)))
                .collect::<Vec<_>>()
                .join("\n");
            non_empty(joined.trim().to_string())
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(|item| plain(item).trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            non_empty(joined)
        }
        other => non_empty(plain(other).trim().to_string()),
    }
}

fn extract_developer_prompt(event: &Envelope) -> Option<String> {
    for key in ["developer_prompt", "developerPrompt", "persona_prompt", "personaPrompt"] {
        if let Some(value) = event.data.get(key) {
            if let Some(text) = coerce_developer_prompt(value) {
                return Some(text);
            }
        }
    }
    None
}

fn coerce_developer_prompt(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => non_empty(s.trim().to_string()),
        other => non_empty(plain(other).trim().to_string()),
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Adapts an `Arc<dyn skynet_agent::LlmProvider>` to the memory crate's
/// narrower `SummaryProvider`, so the two crates never need to depend on
/// each other.
struct LlmSummaryProvider(Arc<dyn LlmProvider>);

#[async_trait]
impl SummaryProvider for LlmSummaryProvider {
    async fn complete(&self, prompt: &str) -> Result<String, String> {
        let request = GenerateRequest {
            text: prompt.to_string(),
            ..Default::default()
        };
        self.0.generate(&request).await.map(|resp| resp.text).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_with(data: Value) -> Envelope {
        Envelope {
            event_type: "input.text".to_string(),
            id: None,
            data: data.as_object().cloned().unwrap_or_default(),
            ts: 0,
            session_id: None,
            source: None,
        }
    }

    #[test]
    fn extract_session_meta_prefers_string_field() {
        let event = envelope_with(json!({"session_meta": "likes dogs"}));
        assert_eq!(extract_session_meta(&event), Some("likes dogs".to_string()));
    }

    #[test]
    fn extract_session_meta_joins_object_fields() {
        let event = envelope_with(json!({"metadata": {"locale": "en-US", "tz": "UTC"}}));
        let meta = extract_session_meta(&event).unwrap();
        assert!(meta.contains("locale: en-US"));
        assert!(meta.contains("tz: UTC"));
    }

    #[test]
    fn extract_session_meta_ignores_blank_string() {
        let event = envelope_with(json!({"session_meta": "   "}));
        assert_eq!(extract_session_meta(&event), None);
    }

    #[test]
    fn extract_session_meta_falls_back_across_key_aliases() {
        let event = envelope_with(json!({"sessionMetadata": ["a", "", "b"]}));
        assert_eq!(extract_session_meta(&event), Some("a\nb".to_string()));
    }

    #[test]
    fn extract_developer_prompt_accepts_camel_case_alias() {
        let event = envelope_with(json!({"personaPrompt": "be concise"}));
        assert_eq!(extract_developer_prompt(&event), Some("be concise".to_string()));
    }

    #[test]
    fn extract_developer_prompt_missing_is_none() {
        let event = envelope_with(json!({"text": "hello"}));
        assert_eq!(extract_developer_prompt(&event), None);
    }

    #[test]
    fn opts_treats_empty_session_id_as_none() {
        let made = opts(Some(String::new()));
        assert!(made.session_id.is_none());
        let made = opts(Some("s1".to_string()));
        assert_eq!(made.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn dispatch_unknown_event_type_yields_no_response() {
        let config = skynet_core::config::SkynetConfig::default();
        let state = crate::app::AppState::new(config);
        let event = envelope_with(json!({}));
        let mut event = event;
        event.event_type = "some.unhandled.event".to_string();
        let responses = dispatch(&state, &event).await;
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn dispatch_interrupt_emits_speech_and_tts_end() {
        let config = skynet_core::config::SkynetConfig::default();
        let state = crate::app::AppState::new(config);
        let mut event = envelope_with(json!({}));
        event.event_type = "input.interrupt".to_string();
        event.session_id = Some("s1".to_string());
        let responses = dispatch(&state, &event).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["type"], "output.speech.end");
        assert_eq!(responses[1]["type"], "tts.end");
    }
}
