use serde::Deserialize;
use std::fmt;

/// Default base URL for the OpenAI-compatible provider API.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Default chat model.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
/// Default transcription model.
pub const DEFAULT_STT_MODEL: &str = "whisper-1";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}

fn default_stt_model() -> String {
    DEFAULT_STT_MODEL.to_string()
}

fn default_true() -> bool {
    true
}

/// Configuration for the OpenAI-compatible provider adapters.
#[derive(Clone, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the provider API (no trailing slash).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API credential. Empty disables outbound provider calls.
    #[serde(default)]
    pub api_key: String,

    /// Chat model used for persona replies.
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Transcription model.
    #[serde(default = "default_stt_model")]
    pub stt_model: String,

    /// Whether the remote moderation endpoint is consulted at all.
    #[serde(default = "default_true")]
    pub guardrail_enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            llm_model: default_llm_model(),
            stt_model: default_stt_model(),
            guardrail_enabled: true,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("llm_model", &self.llm_model)
            .field("stt_model", &self.stt_model)
            .field("guardrail_enabled", &self.guardrail_enabled)
            .finish()
    }
}

impl ProviderConfig {
    /// Joins an endpoint path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let mut config = ProviderConfig::default();
        config.base_url = "https://example.test/v1/".to_string();
        assert_eq!(
            config.endpoint("chat/completions"),
            "https://example.test/v1/chat/completions"
        );
    }

    #[test]
    fn debug_redacts_the_api_key() {
        let mut config = ProviderConfig::default();
        config.api_key = "sk-very-secret".to_string();
        let formatted = format!("{config:?}");
        assert!(!formatted.contains("sk-very-secret"));
        assert!(formatted.contains("[REDACTED]"));
    }
}
