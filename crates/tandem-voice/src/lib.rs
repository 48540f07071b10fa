//! Provider adapters for the Tandem voice platform.
//!
//! Narrow contracts over speech-to-text, language-model streaming,
//! text-to-speech streaming, and content moderation, with
//! OpenAI-compatible HTTP implementations behind them. Adapters are
//! stateless and shared across sessions; transient provider failures are
//! retried with exponential backoff inside the adapter, and a per-session
//! [`CircuitBreaker`] fails turns fast after repeated permanent failures.

pub mod config;
pub mod error;
pub mod llm;
pub mod moderation;
pub mod retry;
pub mod stt;
pub mod tts;

pub use config::ProviderConfig;
pub use error::ProviderError;
pub use llm::OpenAiLlm;
pub use moderation::{Guardrail, Verdict};
pub use retry::{with_retry, CircuitBreaker};
pub use stt::OpenAiStt;
pub use tts::OpenAiTts;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use tandem_types::{ChatMessage, VoiceProfile};

/// A lazy, finite, non-restartable sequence of LLM tokens.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// A lazy, finite, non-restartable sequence of encoded audio chunks.
///
/// All chunks of one stream share a single container format, announced by
/// the adapter that produced the stream.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// Transcribes buffered utterance audio.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribes raw 16 kHz mono PCM16LE audio.
    ///
    /// Returns `Ok(None)` when the buffer is silent or too short to contain
    /// speech; the turn then ends silently with no user-visible failure.
    async fn transcribe(&self, pcm: &[u8]) -> Result<Option<String>, ProviderError>;
}

/// Streams chat completions token by token.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Opens a token stream for the given conversation.
    ///
    /// Dropping the returned stream aborts the underlying request promptly.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<TokenStream, ProviderError>;

    /// Non-streaming completion for short utility calls.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String, ProviderError>;
}

/// Synthesizes speech for one text span.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Opens an audio chunk stream for `text` in the given voice.
    ///
    /// Dropping the returned stream aborts the underlying request promptly.
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
    ) -> Result<AudioStream, ProviderError>;

    /// Container format of the chunks this adapter produces (e.g. `mp3`).
    fn container_format(&self) -> &'static str;
}

/// Content safety check applied to user input and model output.
///
/// Infallible by contract: when the remote provider fails or times out the
/// implementation degrades to a local blocklist.
#[async_trait]
pub trait Moderation: Send + Sync {
    async fn check(&self, text: &str) -> Verdict;
}
