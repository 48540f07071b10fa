//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use tandem_voice::ProviderConfig;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Provider adapter settings.
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Per-session behavior knobs.
    #[serde(default)]
    pub session: SessionConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "tandem_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Provider adapter configuration, including the persona voices.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    /// OpenAI-compatible provider settings.
    #[serde(flatten)]
    pub provider: ProviderConfig,

    /// Synthesis model.
    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    /// Voice name for Bob.
    #[serde(default = "default_voice_bob")]
    pub voice_bob: String,

    /// Voice name for Alice.
    #[serde(default = "default_voice_alice")]
    pub voice_alice: String,
}

/// Per-session behavior knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Seconds of user silence before the active persona nudges.
    #[serde(default = "default_inactivity_secs")]
    pub inactivity_secs: u64,

    /// Echo-guard window after TTS ends or a barge-in, in milliseconds.
    #[serde(default = "default_deaf_window_ms")]
    pub deaf_window_ms: u64,

    /// Outbound event queue capacity. A full queue closes the session.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Utterances below this many PCM bytes are dropped as noise.
    #[serde(default = "default_min_utterance_bytes")]
    pub min_utterance_bytes: usize,

    /// Utterances above this many PCM bytes are dropped as runaway echo.
    #[serde(default = "default_max_utterance_bytes")]
    pub max_utterance_bytes: usize,

    /// Client-side VAD speech threshold, relayed for diagnostics.
    #[serde(default = "default_vad_speech_threshold")]
    pub vad_speech_threshold: f64,

    /// Client-side VAD silence window in milliseconds, relayed for
    /// diagnostics.
    #[serde(default = "default_vad_silence_ms")]
    pub vad_silence_ms: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tts_model() -> String {
    tandem_types::DEFAULT_TTS_MODEL.to_string()
}

fn default_voice_bob() -> String {
    tandem_types::DEFAULT_VOICE_BOB.to_string()
}

fn default_voice_alice() -> String {
    tandem_types::DEFAULT_VOICE_ALICE.to_string()
}

fn default_inactivity_secs() -> u64 {
    30
}

fn default_deaf_window_ms() -> u64 {
    700
}

fn default_outbound_queue() -> usize {
    256
}

fn default_min_utterance_bytes() -> usize {
    8_000 // 0.25 s of 16 kHz mono PCM16
}

fn default_max_utterance_bytes() -> usize {
    400_000 // 12.5 s; beyond this it is accumulated echo, not an utterance
}

fn default_vad_speech_threshold() -> f64 {
    0.015
}

fn default_vad_silence_ms() -> u64 {
    500
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            tts_model: default_tts_model(),
            voice_bob: default_voice_bob(),
            voice_alice: default_voice_alice(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_secs: default_inactivity_secs(),
            deaf_window_ms: default_deaf_window_ms(),
            outbound_queue: default_outbound_queue(),
            min_utterance_bytes: default_min_utterance_bytes(),
            max_utterance_bytes: default_max_utterance_bytes(),
            vad_speech_threshold: default_vad_speech_threshold(),
            vad_silence_ms: default_vad_silence_ms(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TANDEM_HOST` overrides `server.host`
/// - `TANDEM_PORT` overrides `server.port`
/// - `TANDEM_LOG_LEVEL` overrides `logging.level`
/// - `TANDEM_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `OPENAI_API_KEY` overrides `voice.api_key`
/// - `LLM_MODEL` overrides `voice.llm_model`
/// - `TTS_MODEL` overrides `voice.tts_model`
/// - `TTS_VOICE_BOB` / `TTS_VOICE_ALICE` override the persona voices
/// - `GUARDRAIL_ENABLED` overrides `voice.guardrail_enabled`
/// - `VAD_SPEECH_THRESHOLD` / `VAD_SILENCE_MS` override the VAD knobs
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Ok(host) = std::env::var("TANDEM_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("TANDEM_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(level) = std::env::var("TANDEM_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("TANDEM_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        config.voice.provider.api_key = key;
    }
    if let Ok(model) = std::env::var("LLM_MODEL") {
        config.voice.provider.llm_model = model;
    }
    if let Ok(model) = std::env::var("TTS_MODEL") {
        config.voice.tts_model = model;
    }
    if let Ok(voice) = std::env::var("TTS_VOICE_BOB") {
        config.voice.voice_bob = voice;
    }
    if let Ok(voice) = std::env::var("TTS_VOICE_ALICE") {
        config.voice.voice_alice = voice;
    }
    if let Ok(enabled) = std::env::var("GUARDRAIL_ENABLED") {
        config.voice.provider.guardrail_enabled = enabled != "false" && enabled != "0";
    }
    if let Ok(threshold) = std::env::var("VAD_SPEECH_THRESHOLD") {
        if let Ok(parsed) = threshold.parse() {
            config.session.vad_speech_threshold = parsed;
        }
    }
    if let Ok(silence) = std::env::var("VAD_SILENCE_MS") {
        if let Ok(parsed) = silence.parse() {
            config.session.vad_silence_ms = parsed;
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.session.inactivity_secs, 30);
        assert_eq!(config.session.deaf_window_ms, 700);
        assert_eq!(config.session.outbound_queue, 256);
        assert_eq!(config.voice.voice_bob, "alloy");
        assert_eq!(config.voice.voice_alice, "shimmer");
        assert!(config.voice.provider.guardrail_enabled);
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9100

            [voice]
            llm_model = "gpt-4o"
            voice_bob = "onyx"

            [session]
            inactivity_secs = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.voice.provider.llm_model, "gpt-4o");
        assert_eq!(config.voice.voice_bob, "onyx");
        assert_eq!(config.session.inactivity_secs, 10);
        // untouched sections keep defaults
        assert_eq!(config.session.deaf_window_ms, 700);
    }
}
