use std::collections::HashMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::SkynetConfig;

/// Runtime configuration for one upstream engine (an LLM provider or an agent
/// platform), keyed by engine kind + engine id. Populated at startup from the
/// four built-in provider families; loading additional engines from an
/// external YAML catalog is an out-of-scope collaborator — only the shape and
/// the built-in entries live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRuntimeConfig {
    pub id: String,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default)]
    pub default_params: HashMap<String, serde_json::Value>,
    #[serde(default = "default_engine_type")]
    pub engine_type: String,
    #[serde(default)]
    pub paths: HashMap<String, String>,
}

fn default_timeout() -> f64 {
    60.0
}
fn default_engine_type() -> String {
    "openai_compat".to_string()
}

/// Engine kind namespaces: `llm`, `agent` (the upstream system also tracks
/// `tts`/`asr`, out of scope here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Llm,
    Agent,
}

impl EngineKind {
    fn as_str(self) -> &'static str {
        match self {
            EngineKind::Llm => "llm",
            EngineKind::Agent => "agent",
        }
    }
}

#[derive(Debug, Default)]
pub struct EngineRuntimeStore {
    configs: DashMap<(&'static str, String), EngineRuntimeConfig>,
}

impl EngineRuntimeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: EngineKind, config: EngineRuntimeConfig) {
        self.configs
            .insert((kind.as_str(), config.id.clone()), config);
    }

    pub fn get(&self, kind: EngineKind, engine_id: &str) -> Option<EngineRuntimeConfig> {
        self.configs
            .get(&(kind.as_str(), engine_id.to_string()))
            .map(|entry| entry.clone())
    }

    /// Build the store's four built-in entries from global settings, the way
    /// the reference implementation's provider factory resolves them.
    pub fn bootstrap(config: &SkynetConfig) -> Self {
        let store = Self::new();

        store.register(
            EngineKind::Llm,
            EngineRuntimeConfig {
                id: "openai".to_string(),
                base_url: config.openai_base_url.clone(),
                model: config.openai_model.clone(),
                api_key: Some(config.openai_api_key.clone()),
                headers: HashMap::new(),
                timeout: config.llm_timeout,
                default_params: HashMap::new(),
                engine_type: "openai_compat".to_string(),
                paths: [("chat".to_string(), "/chat/completions".to_string())]
                    .into_iter()
                    .collect(),
            },
        );

        store.register(
            EngineKind::Agent,
            EngineRuntimeConfig {
                id: "dify".to_string(),
                base_url: config.dify_base_url.clone(),
                model: String::new(),
                api_key: Some(config.dify_api_key.clone()),
                headers: HashMap::new(),
                timeout: config.llm_timeout,
                default_params: [("user".to_string(), serde_json::json!(config.dify_user))]
                    .into_iter()
                    .collect(),
                engine_type: "dify".to_string(),
                paths: [
                    ("chat".to_string(), "/chat-messages".to_string()),
                    ("conversation".to_string(), "/chat-messages".to_string()),
                ]
                .into_iter()
                .collect(),
            },
        );

        store.register(
            EngineKind::Agent,
            EngineRuntimeConfig {
                id: "fastgpt".to_string(),
                base_url: config.fastgpt_base_url.clone(),
                model: String::new(),
                api_key: Some(config.fastgpt_api_key.clone()),
                headers: HashMap::new(),
                timeout: config.llm_timeout,
                default_params: [("customUid".to_string(), serde_json::json!(config.fastgpt_uid))]
                    .into_iter()
                    .collect(),
                engine_type: "fastgpt".to_string(),
                paths: [("chat".to_string(), "/v1/chat/completions".to_string())]
                    .into_iter()
                    .collect(),
            },
        );

        store.register(
            EngineKind::Agent,
            EngineRuntimeConfig {
                id: "coze".to_string(),
                base_url: config.coze_api_base.clone(),
                model: String::new(),
                api_key: Some(config.coze_token.clone()),
                headers: HashMap::new(),
                timeout: config.llm_timeout,
                default_params: [
                    ("bot_id".to_string(), serde_json::json!(config.coze_bot_id)),
                    ("user_id".to_string(), serde_json::json!(config.coze_user)),
                ]
                .into_iter()
                .collect(),
                engine_type: "coze".to_string(),
                paths: [
                    ("conversation".to_string(), "/v1/conversation/create".to_string()),
                    ("chat".to_string(), "/v3/chat".to_string()),
                ]
                .into_iter()
                .collect(),
            },
        );

        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_registers_four_built_ins() {
        let config = SkynetConfig::default();
        let store = EngineRuntimeStore::bootstrap(&config);
        assert!(store.get(EngineKind::Llm, "openai").is_some());
        assert!(store.get(EngineKind::Agent, "dify").is_some());
        assert!(store.get(EngineKind::Agent, "fastgpt").is_some());
        assert!(store.get(EngineKind::Agent, "coze").is_some());
        assert!(store.get(EngineKind::Agent, "unknown").is_none());
    }
}
