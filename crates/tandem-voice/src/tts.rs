//! Speech synthesis over an OpenAI-compatible endpoint.
//!
//! One request per sentence span; the encoded audio body is forwarded
//! chunk by chunk as it arrives so the client can start playback before
//! synthesis finishes. Dropping the returned stream aborts the request.

use crate::{with_retry, AudioStream, ProviderConfig, ProviderError, TextToSpeech};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tandem_types::VoiceProfile;
use tokio_stream::wrappers::ReceiverStream;

/// Maximum text length for one synthesis request. Longer spans are
/// truncated at a character boundary.
pub const MAX_TTS_INPUT_CHARS: usize = 4096;

/// Connect timeout for synthesis requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Container format of the synthesized audio.
const CONTAINER_FORMAT: &str = "mp3";

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

/// Synthesis adapter against an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    http: reqwest::Client,
    config: Arc<ProviderConfig>,
}

impl OpenAiTts {
    pub fn new(config: Arc<ProviderConfig>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self { http, config }
    }

    async fn open_stream(
        &self,
        text: &str,
        voice: &VoiceProfile,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = self.config.endpoint("audio/speech");
        let body = SpeechRequest {
            model: &voice.model,
            voice: &voice.voice,
            input: text,
            response_format: CONTAINER_FORMAT,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl TextToSpeech for OpenAiTts {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
    ) -> Result<AudioStream, ProviderError> {
        let text = clamp_chars(text.trim(), MAX_TTS_INPUT_CHARS);
        if text.is_empty() {
            return Err(ProviderError::InvalidInput("empty synthesis text".into()));
        }

        let response =
            with_retry("tts.synthesize", || self.open_stream(&text, voice)).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, ProviderError>>(32);
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let item = chunk.map_err(|e| ProviderError::Transient(e.to_string()));
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    // Receiver dropped (barge-in) or body error: abort.
                    break;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn container_format(&self) -> &'static str {
        CONTAINER_FORMAT
    }
}

fn clamp_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
