use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Protocol/resource constants.
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024;
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Flat, env-driven configuration mirroring the upstream settings module.
/// Every field name below corresponds 1:1 to an environment variable in the
/// external-interfaces list; there is no nested `SKYNET_`-prefixed namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkynetConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_cors_origins")]
    pub cors_allow_origins: Vec<String>,
    #[serde(default = "default_engine_config_path")]
    pub engine_config_path: String,
    #[serde(default = "default_provider_catalog_path")]
    pub provider_catalog_path: String,
    #[serde(default = "default_plugin_catalog_path")]
    pub plugin_catalog_path: String,
    #[serde(default)]
    pub ws_auth_token: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout: f64,
    #[serde(default = "default_llm_temperature")]
    pub llm_temperature: f64,
    #[serde(default)]
    pub llm_system_prompt: Option<String>,

    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    #[serde(default = "default_dify_base_url")]
    pub dify_base_url: String,
    #[serde(default)]
    pub dify_api_key: String,
    #[serde(default = "default_whale")]
    pub dify_user: String,

    #[serde(default = "default_fastgpt_base_url")]
    pub fastgpt_base_url: String,
    #[serde(default)]
    pub fastgpt_api_key: String,
    #[serde(default = "default_whale")]
    pub fastgpt_uid: String,

    #[serde(default = "default_coze_api_base")]
    pub coze_api_base: String,
    #[serde(default)]
    pub coze_token: String,
    #[serde(default)]
    pub coze_bot_id: String,
    #[serde(default = "default_whale")]
    pub coze_user: String,

    #[serde(default = "bool_true")]
    pub memory_enabled: bool,
    #[serde(default = "default_memory_db_path")]
    pub memory_db_path: String,
    #[serde(default = "default_session_window")]
    pub memory_session_window: i64,
    #[serde(default = "default_facts_max")]
    pub memory_facts_max: i64,
    #[serde(default = "default_summaries_max")]
    pub memory_summaries_max: i64,
    #[serde(default = "default_summary_max_chars")]
    pub memory_summary_max_chars: usize,
    #[serde(default = "default_summary_min_messages")]
    pub memory_summary_min_messages: i64,
    #[serde(default = "default_summary_user_limit")]
    pub memory_summary_user_limit: usize,
    /// Carried through but not consumed by the current summarization path
    /// (reserved — see open questions).
    #[serde(default = "default_summary_assistant_limit")]
    pub memory_summary_assistant_limit: usize,
}

fn bool_true() -> bool {
    true
}
fn default_app_name() -> String {
    "WhaleWhisper Backend".to_string()
}
fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_engine_config_path() -> String {
    "config/engines.yaml".to_string()
}
fn default_provider_catalog_path() -> String {
    "config/providers.yaml".to_string()
}
fn default_plugin_catalog_path() -> String {
    "config/plugins.yaml".to_string()
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_timeout() -> f64 {
    30.0
}
fn default_llm_temperature() -> f64 {
    0.7
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_dify_base_url() -> String {
    "https://api.dify.ai/v1".to_string()
}
fn default_fastgpt_base_url() -> String {
    "https://cloud.fastgpt.cn/api".to_string()
}
fn default_coze_api_base() -> String {
    "https://api.coze.cn".to_string()
}
fn default_whale() -> String {
    "whale".to_string()
}
fn default_memory_db_path() -> String {
    "data/memory.db".to_string()
}
fn default_session_window() -> i64 {
    12
}
fn default_facts_max() -> i64 {
    48
}
fn default_summaries_max() -> i64 {
    12
}
fn default_summary_max_chars() -> usize {
    480
}
fn default_summary_min_messages() -> i64 {
    6
}
fn default_summary_user_limit() -> usize {
    3
}
fn default_summary_assistant_limit() -> usize {
    2
}

impl Default for SkynetConfig {
    fn default() -> Self {
        Figment::new()
            .merge(Env::raw())
            .extract()
            .expect("defaults for every field make this infallible")
    }
}

impl SkynetConfig {
    /// Load configuration from the process environment, optionally layering a
    /// TOML file (`APP_CONFIG_TOML`) underneath so that env vars always win.
    pub fn load() -> crate::error::Result<Self> {
        let mut figment = Figment::new();
        if let Ok(toml_path) = std::env::var("APP_CONFIG_TOML") {
            figment = figment.merge(Toml::file(toml_path));
        }
        figment = figment.merge(Env::raw());
        figment
            .extract()
            .map_err(|e| crate::error::SkynetError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_settings() {
        // clear anything the test harness's environment may have set
        for key in [
            "LLM_PROVIDER",
            "MEMORY_SESSION_WINDOW",
            "DIFY_USER",
            "WS_AUTH_TOKEN",
        ] {
            std::env::remove_var(key);
        }
        let cfg = SkynetConfig::default();
        assert_eq!(cfg.llm_provider, "openai");
        assert_eq!(cfg.memory_session_window, 12);
        assert_eq!(cfg.dify_user, "whale");
        assert!(cfg.ws_auth_token.is_none());
        assert_eq!(cfg.cors_allow_origins, vec!["*".to_string()]);
    }
}
