use axum::{
    routing::{delete, get, post},
    Router,
};
use dashmap::DashMap;
use skynet_core::config::SkynetConfig;
use skynet_core::engine::EngineRuntimeStore;
use skynet_memory::{MemoryService, MemorySettings, MemoryStore};
use skynet_sessions::SessionRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::ws::hub::PeerHandle;

/// Central shared state, passed as `Arc<AppState>` to every handler and to
/// the per-connection WS tasks.
pub struct AppState {
    pub config: SkynetConfig,
    pub sessions: SessionRegistry,
    pub memory: MemoryService,
    pub engines: EngineRuntimeStore,
    /// `WS_AUTH_TOKEN`, cached so the hub doesn't re-read config per message.
    pub auth_token: Option<String>,
    /// Connected peers, keyed by the peer id assigned at `connect`.
    pub peers: DashMap<String, PeerHandle>,
    /// `module.announce` index: name -> index -> peer id.
    pub modules: DashMap<String, DashMap<Option<i64>, String>>,
}

impl AppState {
    pub fn new(config: SkynetConfig) -> Self {
        let engines = EngineRuntimeStore::bootstrap(&config);
        let auth_token = config.ws_auth_token.clone();
        let memory_settings = MemorySettings {
            enabled: config.memory_enabled,
            session_window: config.memory_session_window,
            facts_max: config.memory_facts_max,
            summaries_max: config.memory_summaries_max,
            summary_max_chars: config.memory_summary_max_chars,
            summary_min_messages: config.memory_summary_min_messages,
            summary_user_limit: config.memory_summary_user_limit,
        };
        let memory = MemoryService::new(MemoryStore::new(config.memory_db_path.clone()), memory_settings);

        Self {
            config,
            sessions: SessionRegistry::new(),
            memory,
            engines,
            auth_token,
            peers: DashMap::new(),
            modules: DashMap::new(),
        }
    }

    pub fn send_to_peer(&self, peer_id: &str, event: serde_json::Value) {
        if let Some(peer) = self.peers.get(peer_id) {
            let text = event.to_string();
            if peer.tx.send(axum::extract::ws::Message::Text(text.into())).is_err() {
                drop(peer);
                self.peers.remove(peer_id);
            }
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::http::health::healthz))
        .route("/ws", get(crate::ws::handler::ws_handler))
        .route("/memory/facts", get(crate::http::memory::list_facts))
        .route("/memory/facts/{id}", delete(crate::http::memory::delete_fact))
        .route("/memory/candidates", get(crate::http::memory::list_candidates))
        .route(
            "/memory/candidates/{id}/accept",
            post(crate::http::memory::accept_candidate),
        )
        .route(
            "/memory/candidates/{id}/reject",
            post(crate::http::memory::reject_candidate),
        )
        .route("/memory/summaries", get(crate::http::memory::list_summaries))
        .route(
            "/memory/summaries/{id}",
            delete(crate::http::memory::delete_summary),
        )
        .route("/memory/export", get(crate::http::memory::export_memory))
        .route("/memory/import", post(crate::http::memory::import_memory))
        .route("/agent/engines", post(crate::http::agent::run_agent_engine))
        .route(
            "/agent/engines/{engine}",
            post(crate::http::agent::create_agent_conversation),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
