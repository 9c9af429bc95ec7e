pub mod agent_handler;
pub mod coze;
pub mod dify;
pub mod factory;
pub mod fastgpt;
pub mod openai;
pub mod provider;
pub mod stream;

pub use agent_handler::{
    build_agent_handler, coerce_text, sse_error, sse_event, AgentContext, AgentEvent, AgentHandler,
};
pub use factory::{build_llm_provider, build_provider_config, normalize_provider_id, ProviderConfig};
pub use provider::{ChatMessage, GenerateRequest, LlmProvider, LlmResponse, ProviderError};
