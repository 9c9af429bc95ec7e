use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures_util::stream::Stream;
use futures_util::StreamExt as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use skynet_agent::{build_agent_handler, coerce_text, sse_error, sse_event, AgentContext, AgentEvent};
use skynet_core::engine::EngineKind;
use skynet_memory::MemoryScope;

use crate::app::AppState;

fn default_user_id() -> String {
    "default".to_string()
}
fn default_profile_id() -> String {
    "default".to_string()
}
fn default_session_id() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
pub struct MemoryBridgeConfig {
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_profile_id")]
    pub profile_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RunEngineRequest {
    pub engine: String,
    #[serde(default)]
    pub data: Value,
    #[serde(rename = "memoryBridge", alias = "memory_bridge", default)]
    pub memory_bridge: Option<MemoryBridgeConfig>,
}

/// Strips the `memoryBridge`/`memory_bridge` key before the rest of `data`
/// is handed to the handler as per-call params — the bridge config is a
/// gateway-side concern, never forwarded upstream.
fn strip_agent_config(data: &Value) -> serde_json::Map<String, Value> {
    let mut params = data.as_object().cloned().unwrap_or_default();
    params.remove("memoryBridge");
    params.remove("memory_bridge");
    params
}

/// `POST /agent/engines` — streams one agent turn as SSE frames.
pub async fn run_agent_engine(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RunEngineRequest>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (tx, rx) = mpsc::channel::<String>(32);

    let Some(runtime) = state.engines.get(EngineKind::Agent, &request.engine) else {
        let tx = tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(sse_error("unknown agent engine")).await;
        });
        return sse_stream(rx);
    };

    let mut text = match coerce_text(&request.data) {
        Some(text) => text,
        None => {
            tokio::spawn(async move {
                let _ = tx.send(sse_error("agent engine request requires text")).await;
            });
            return sse_stream(rx);
        }
    };

    if let Some(bridge) = &request.memory_bridge {
        let scope = MemoryScope::new(bridge.session_id.clone(), bridge.user_id.clone(), bridge.profile_id.clone());
        match state.memory.build_context(&scope, false) {
            Ok(context) => {
                text = state.memory.build_prompt(None, None, &context, &text);
            }
            Err(err) => {
                tokio::spawn(async move {
                    let _ = tx.send(sse_error(&format!("memory bridge failed: {err}"))).await;
                });
                return sse_stream(rx);
            }
        }
    }

    let params = strip_agent_config(&request.data);
    let engine_type = runtime.engine_type.clone();

    tokio::spawn(async move {
        let handler = match build_agent_handler(&engine_type) {
            Ok(handler) => handler,
            Err(err) => {
                let _ = tx.send(sse_error(&err.to_string())).await;
                return;
            }
        };
        let ctx = AgentContext { runtime, params };
        let (event_tx, mut event_rx) = mpsc::channel::<AgentEvent>(32);
        let stream_task = tokio::spawn(async move { handler.stream(&ctx, &text, event_tx).await });

        while let Some(event) = event_rx.recv().await {
            if tx.send(sse_event(&event)).await.is_err() {
                return;
            }
        }
        if let Ok(Err(err)) = stream_task.await {
            let _ = tx.send(sse_error(&err.to_string())).await;
        }
    });

    sse_stream(rx)
}

fn sse_stream(rx: mpsc::Receiver<String>) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|frame| Ok(Event::default().data(frame)));
    Sse::new(stream)
}

/// `POST /agent/engines/{engine}` — creates (or resolves) a conversation.
pub async fn create_agent_conversation(
    State(state): State<Arc<AppState>>,
    Path(engine): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let bad_request = |message: String| (StatusCode::BAD_REQUEST, Json(json!({"error": message})));

    let Some(runtime) = state.engines.get(EngineKind::Agent, &engine) else {
        return Err(bad_request(format!("unknown agent engine: {engine}")));
    };

    let handler = build_agent_handler(&runtime.engine_type).map_err(|e| bad_request(e.to_string()))?;
    let params = body.as_object().cloned().unwrap_or_default();
    let ctx = AgentContext { runtime, params };

    let conversation_id = handler
        .create_conversation(&ctx)
        .await
        .map_err(|e| bad_request(e.to_string()))?;

    match conversation_id {
        Some(id) => Ok(Json(json!({"conversationId": id}))),
        None => Err(bad_request("engine did not return a conversation id".to_string())),
    }
}
