//! Chat completion streaming over an OpenAI-compatible endpoint.
//!
//! Tokens arrive as server-sent `data:` lines on a chunked response body.
//! The adapter parses them incrementally and forwards each delta through a
//! bounded channel; dropping the returned stream closes the channel, which
//! aborts the underlying request on the next chunk.

use crate::{with_retry, LanguageModel, ProviderConfig, ProviderError, TokenStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tandem_types::ChatMessage;
use tokio_stream::wrappers::ReceiverStream;

/// Generation ceiling for persona replies.
pub const DEFAULT_MAX_TOKENS: u32 = 400;

/// Sampling temperature for persona replies.
const TEMPERATURE: f32 = 0.7;

/// Overall timeout for a non-streaming completion.
const COMPLETE_TIMEOUT: Duration = Duration::from_secs(30);

/// End-of-stream sentinel in the SSE protocol.
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Returns the payload of one SSE line, if it is a `data:` line.
fn sse_data(line: &str) -> Option<&str> {
    line.trim().strip_prefix("data:").map(str::trim_start)
}

/// Extracts the token delta from one parsed stream chunk payload.
fn token_from_payload(payload: &str) -> Option<String> {
    let chunk: StreamChunk = serde_json::from_str(payload).ok()?;
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|token| !token.is_empty())
}

/// Streaming chat adapter against an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiLlm {
    http: reqwest::Client,
    config: Arc<ProviderConfig>,
}

impl OpenAiLlm {
    pub fn new(config: Arc<ProviderConfig>) -> Self {
        // No overall timeout on the streaming client: a reply can
        // legitimately stream for longer than any single-request budget.
        // Connect failures still surface promptly.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self { http, config }
    }

    async fn open_stream(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = self.config.endpoint("chat/completions");
        let body = ChatRequest {
            model: &self.config.llm_model,
            messages,
            max_tokens,
            temperature: TEMPERATURE,
            stream: true,
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
impl LanguageModel for OpenAiLlm {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<TokenStream, ProviderError> {
        // Only the request setup is retried; an SSE stream is not
        // restartable once tokens have flowed.
        let response = with_retry("llm.stream", || self.open_stream(messages, max_tokens)).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, ProviderError>>(64);
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            // Byte buffer, not String: a multi-byte character can be split
            // across network chunks, so decoding happens per complete line.
            let mut pending: Vec<u8> = Vec::new();

            'outer: while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx.send(Err(ProviderError::Transient(err.to_string()))).await;
                        break;
                    }
                };
                pending.extend_from_slice(&chunk);

                while let Some(newline) = pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();

                    let Some(payload) = sse_data(&line) else {
                        continue;
                    };
                    if payload == DONE_SENTINEL {
                        break 'outer;
                    }
                    if let Some(token) = token_from_payload(payload) {
                        // A closed receiver means the turn was cancelled;
                        // dropping the response aborts the request.
                        if tx.send(Ok(token)).await.is_err() {
                            break 'outer;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let url = self.config.endpoint("chat/completions");

        with_retry("llm.complete", || {
            let body = ChatRequest {
                model: &self.config.llm_model,
                messages,
                max_tokens,
                temperature: 0.0,
                stream: false,
            };
            let request = self
                .http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .timeout(COMPLETE_TIMEOUT);

            async move {
                let response = request.send().await?;
                let status = response.status();
                let text = response.text().await?;
                if !status.is_success() {
                    return Err(ProviderError::from_status(status, &text));
                }
                let completion: Completion = serde_json::from_str(&text)
                    .map_err(|e| ProviderError::Decode(e.to_string()))?;
                Ok(completion
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .unwrap_or_default())
            }
        })
        .await
    }
}
