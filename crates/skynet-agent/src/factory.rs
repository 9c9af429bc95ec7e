use std::collections::HashMap;
use std::sync::Arc;

use skynet_core::SkynetConfig;

use crate::coze::CozeProvider;
use crate::dify::DifyProvider;
use crate::fastgpt::FastGptProvider;
use crate::openai::OpenAiProvider;
use crate::provider::{LlmProvider, ProviderError};

/// Legacy aliases for the OpenAI-compatible family, normalized to `"openai"`.
const OPENAI_ALIASES: [&str; 3] = ["openai", "openai_compat", "openai-compatible"];

pub fn normalize_provider_id(id: &str) -> String {
    let lower = id.trim().to_lowercase();
    if OPENAI_ALIASES.contains(&lower.as_str()) {
        "openai".to_string()
    } else {
        lower
    }
}

/// Resolved per-turn provider configuration: an explicit `provider` object on
/// the inbound payload, falling back field-by-field to global settings.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub extra: HashMap<String, serde_json::Value>,
}

/// Builds a `ProviderConfig` from the optional `provider` object on an
/// `input.text` payload (`{id, api_key?, base_url?, model?, extra?}`),
/// falling back to global settings per provider family and injecting the
/// family-specific `extra` defaults (`user` for dify, `uid` for fastgpt,
/// `bot_id`+`user` for coze).
pub fn build_provider_config(payload: &serde_json::Value, settings: &SkynetConfig) -> ProviderConfig {
    let provider = payload.get("provider").and_then(|v| v.as_object());

    let raw_id = provider
        .and_then(|p| p.get("id"))
        .and_then(|v| v.as_str())
        .unwrap_or(settings.llm_provider.as_str());
    let provider_id = normalize_provider_id(raw_id);

    let api_key = provider
        .and_then(|p| p.get("api_key").or_else(|| p.get("apiKey")))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let base_url = provider
        .and_then(|p| p.get("base_url").or_else(|| p.get("baseUrl")))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let model = provider
        .and_then(|p| p.get("model"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let mut extra: HashMap<String, serde_json::Value> = provider
        .and_then(|p| p.get("extra"))
        .and_then(|v| v.as_object())
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    match provider_id.as_str() {
        "dify" => {
            extra.entry("user".to_string()).or_insert_with(|| serde_json::json!(settings.dify_user));
        }
        "fastgpt" => {
            extra.entry("uid".to_string()).or_insert_with(|| serde_json::json!(settings.fastgpt_uid));
        }
        "coze" => {
            extra.entry("bot_id".to_string()).or_insert_with(|| serde_json::json!(settings.coze_bot_id));
            extra.entry("user".to_string()).or_insert_with(|| serde_json::json!(settings.coze_user));
        }
        _ => {}
    }

    ProviderConfig {
        provider_id,
        api_key,
        base_url,
        model,
        extra,
    }
}

fn extra_str(config: &ProviderConfig, key: &str, default: &str) -> String {
    config
        .extra
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
}

/// Builds the concrete LLM-family provider for a resolved `ProviderConfig`,
/// falling back to global settings for any field the caller didn't override.
/// Mirrors the reference factory's one `LLMConfigError` per missing required
/// field per family.
pub fn build_llm_provider(
    config: &ProviderConfig,
    settings: &SkynetConfig,
) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    match config.provider_id.as_str() {
        "openai" => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .or_else(|| Some(settings.openai_api_key.clone()))
                .filter(|k| !k.is_empty())
                .ok_or_else(|| ProviderError::Config("missing OpenAI API key".to_string()))?;
            let base_url = config.base_url.clone().unwrap_or_else(|| settings.openai_base_url.clone());
            let model = config.model.clone().unwrap_or_else(|| settings.openai_model.clone());
            Ok(Arc::new(OpenAiProvider::new(api_key, base_url, model, settings.llm_temperature)))
        }
        "dify" => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .or_else(|| Some(settings.dify_api_key.clone()))
                .filter(|k| !k.is_empty())
                .ok_or_else(|| ProviderError::Config("missing Dify API key".to_string()))?;
            let base_url = config.base_url.clone().unwrap_or_else(|| settings.dify_base_url.clone());
            let user = extra_str(config, "user", &settings.dify_user);
            Ok(Arc::new(DifyProvider::new(api_key, base_url, user)))
        }
        "fastgpt" => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .or_else(|| Some(settings.fastgpt_api_key.clone()))
                .filter(|k| !k.is_empty())
                .ok_or_else(|| ProviderError::Config("missing FastGPT API key".to_string()))?;
            let base_url = config.base_url.clone().unwrap_or_else(|| settings.fastgpt_base_url.clone());
            let uid = extra_str(config, "uid", &settings.fastgpt_uid);
            Ok(Arc::new(FastGptProvider::new(api_key, base_url, uid)))
        }
        "coze" => {
            let token = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .or_else(|| Some(settings.coze_token.clone()))
                .filter(|k| !k.is_empty())
                .ok_or_else(|| ProviderError::Config("missing Coze token".to_string()))?;
            let api_base = config.base_url.clone().unwrap_or_else(|| settings.coze_api_base.clone());
            let bot_id = extra_str(config, "bot_id", &settings.coze_bot_id);
            if bot_id.is_empty() {
                return Err(ProviderError::Config("missing Coze bot id".to_string()));
            }
            let user = extra_str(config, "user", &settings.coze_user);
            Ok(Arc::new(CozeProvider::new(token, api_base, bot_id, user)))
        }
        other => Err(ProviderError::Config(format!("unknown provider id: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SkynetConfig {
        SkynetConfig::default()
    }

    #[test]
    fn normalizes_openai_aliases() {
        assert_eq!(normalize_provider_id("OpenAI-Compatible"), "openai");
        assert_eq!(normalize_provider_id("openai_compat"), "openai");
        assert_eq!(normalize_provider_id("Dify"), "dify");
    }

    #[test]
    fn build_provider_config_injects_dify_user_default() {
        let cfg = settings();
        let payload = serde_json::json!({"provider": {"id": "dify"}});
        let resolved = build_provider_config(&payload, &cfg);
        assert_eq!(resolved.provider_id, "dify");
        assert_eq!(resolved.extra.get("user").unwrap(), &serde_json::json!(cfg.dify_user));
    }

    #[test]
    fn build_llm_provider_rejects_missing_coze_bot_id() {
        let cfg = settings();
        let config = ProviderConfig {
            provider_id: "coze".to_string(),
            api_key: Some("token".to_string()),
            ..Default::default()
        };
        assert!(build_llm_provider(&config, &cfg).is_err());
    }
}
