//! Speech-to-text over the provider's transcription endpoint.
//!
//! The browser worklet ships raw 16-bit little-endian PCM at 16 kHz mono.
//! The transcription API requires a proper audio container, so the buffer
//! is wrapped in a WAV header before upload. Near-silent buffers are
//! rejected locally to avoid wasting provider quota on room noise.

use crate::{with_retry, ProviderConfig, ProviderError, SpeechToText};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Maximum audio input size (10 MiB). Prevents OOM from oversized payloads.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// HTTP timeout for one transcription request.
const STT_TIMEOUT: Duration = Duration::from_secs(30);

/// PCM parameters the client is required to send.
pub const SAMPLE_RATE: u32 = 16_000;
const CHANNELS: u16 = 1;
const BYTES_PER_SAMPLE: u16 = 2;

/// Minimum speech length worth transcribing.
pub const MIN_SPEECH_MS: u32 = 250;

/// RMS level (0..1) below which a buffer counts as silence.
const SILENCE_RMS_THRESHOLD: f32 = 0.002;

/// Smallest buffer that can contain [`MIN_SPEECH_MS`] of audio.
pub const fn min_speech_bytes() -> usize {
    (SAMPLE_RATE as usize * BYTES_PER_SAMPLE as usize * MIN_SPEECH_MS as usize) / 1000
}

/// Wraps raw PCM16LE mono 16 kHz bytes in a WAV container.
pub fn pcm_to_wav(pcm: &[u8]) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let byte_rate = SAMPLE_RATE * u32::from(CHANNELS) * u32::from(BYTES_PER_SAMPLE);
    let block_align = CHANNELS * BYTES_PER_SAMPLE;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // PCM fmt chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    wav.extend_from_slice(&CHANNELS.to_le_bytes());
    wav.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&(u16::from(BYTES_PER_SAMPLE) * 8).to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

/// Root-mean-square level of a PCM16LE buffer, normalized to 0..1.
pub fn rms(pcm: &[u8]) -> f32 {
    if pcm.len() < 2 {
        return 0.0;
    }
    let mut sum = 0f64;
    let mut count = 0usize;
    for sample in pcm.chunks_exact(2) {
        let value = i16::from_le_bytes([sample[0], sample[1]]) as f64;
        sum += value * value;
        count += 1;
    }
    ((sum / count as f64).sqrt() / f64::from(i16::MAX)) as f32
}

/// Whether a buffer is too short or too quiet to contain speech.
pub fn is_silence(pcm: &[u8]) -> bool {
    pcm.len() < min_speech_bytes() || rms(pcm) < SILENCE_RMS_THRESHOLD
}

/// Transcription adapter against an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiStt {
    http: reqwest::Client,
    config: Arc<ProviderConfig>,
}

impl OpenAiStt {
    pub fn new(config: Arc<ProviderConfig>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(STT_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self { http, config }
    }
}

#[async_trait]
impl SpeechToText for OpenAiStt {
    async fn transcribe(&self, pcm: &[u8]) -> Result<Option<String>, ProviderError> {
        if pcm.len() > MAX_STT_INPUT_BYTES {
            return Err(ProviderError::InvalidInput(format!(
                "audio exceeds maximum size: {} bytes (limit: {} bytes)",
                pcm.len(),
                MAX_STT_INPUT_BYTES
            )));
        }
        if is_silence(pcm) {
            tracing::debug!(bytes = pcm.len(), "skipping transcription, audio is silent");
            return Ok(None);
        }

        let wav = pcm_to_wav(pcm);
        let url = self.config.endpoint("audio/transcriptions");

        let text = with_retry("stt.transcribe", || {
            let part = reqwest::multipart::Part::bytes(wav.clone())
                .file_name("audio.wav")
                .mime_str("audio/wav")
                .expect("static mime type");
            let form = reqwest::multipart::Form::new()
                .part("file", part)
                .text("model", self.config.stt_model.clone())
                .text("language", "en")
                .text("response_format", "text");

            let request = self
                .http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .multipart(form);

            async move {
                let response = request.send().await?;
                let status = response.status();
                let body = response.text().await?;
                if !status.is_success() {
                    return Err(ProviderError::from_status(status, &body));
                }
                Ok(body)
            }
        })
        .await?;

        let text = text.trim().to_string();
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }
}
