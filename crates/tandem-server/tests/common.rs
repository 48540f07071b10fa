//! Shared test harness: scripted mock adapters and a WebSocket client.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tandem_server::config::Config;
use tandem_server::{app, AppState, SessionRegistry};
use tandem_types::{ChatMessage, VoiceProfile};
use tandem_voice::{
    AudioStream, LanguageModel, Moderation, ProviderError, SpeechToText, TextToSpeech,
    TokenStream, Verdict,
};
use tokio::net::TcpStream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

/// STT mock: silence-gated, otherwise returns the configured transcript.
pub struct MockStt {
    pub transcript: Mutex<Option<String>>,
}

impl MockStt {
    pub fn returning(text: &str) -> Arc<Self> {
        Arc::new(Self {
            transcript: Mutex::new(Some(text.to_string())),
        })
    }

    pub fn silent() -> Arc<Self> {
        Arc::new(Self {
            transcript: Mutex::new(None),
        })
    }
}

#[async_trait]
impl SpeechToText for MockStt {
    async fn transcribe(&self, pcm: &[u8]) -> Result<Option<String>, ProviderError> {
        if tandem_voice::stt::is_silence(pcm) {
            return Ok(None);
        }
        Ok(self.transcript.lock().unwrap().clone())
    }
}

/// LLM mock: streams a fixed token reply and records every message list
/// it was given.
pub struct MockLlm {
    pub reply: Vec<String>,
    pub token_delay: Duration,
    pub calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlm {
    pub fn new(reply: &[&str]) -> Arc<Self> {
        Self::slow(reply, Duration::from_millis(1))
    }

    pub fn slow(reply: &[&str], token_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.iter().map(|s| s.to_string()).collect(),
            token_delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn recorded_calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for MockLlm {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        _max_tokens: u32,
    ) -> Result<TokenStream, ProviderError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let tokens = self.reply.clone();
        let delay = self.token_delay;

        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tokio::spawn(async move {
            for token in tokens {
                tokio::time::sleep(delay).await;
                if tx.send(Ok(token)).await.is_err() {
                    return;
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _max_tokens: u32,
    ) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.join(""))
    }
}

/// TTS mock: records `(voice, text)` per call and yields two fixed chunks.
pub struct MockTts {
    pub calls: Mutex<Vec<(String, String)>>,
    pub chunk_delay: Duration,
}

impl MockTts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            chunk_delay: Duration::from_millis(1),
        })
    }

    pub fn recorded_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextToSpeech for MockTts {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
    ) -> Result<AudioStream, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((voice.voice.clone(), text.to_string()));
        let delay = self.chunk_delay;

        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tokio::spawn(async move {
            for chunk in [&b"fake-audio-0"[..], &b"fake-audio-1"[..]] {
                tokio::time::sleep(delay).await;
                if tx.send(Ok(bytes::Bytes::from_static(chunk))).await.is_err() {
                    return;
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn container_format(&self) -> &'static str {
        "mp3"
    }
}

/// Moderation mock: blocks any text containing the word "forbidden".
pub struct MockModeration;

#[async_trait]
impl Moderation for MockModeration {
    async fn check(&self, text: &str) -> Verdict {
        if text.to_lowercase().contains("forbidden") {
            Verdict::Blocked {
                reason: "test blocklist match".to_string(),
            }
        } else {
            Verdict::Pass
        }
    }
}

/// Builds an AppState over the given mocks.
pub fn mock_state(stt: Arc<MockStt>, llm: Arc<MockLlm>, tts: Arc<MockTts>) -> AppState {
    mock_state_with_config(Config::default(), stt, llm, tts)
}

/// Builds an AppState over the given mocks with a custom configuration.
pub fn mock_state_with_config(
    config: Config,
    stt: Arc<MockStt>,
    llm: Arc<MockLlm>,
    tts: Arc<MockTts>,
) -> AppState {
    AppState {
        config,
        stt,
        llm,
        tts,
        moderation: Arc::new(MockModeration),
        sessions: SessionRegistry::new(),
    }
}

/// Boots the app on an ephemeral port.
pub async fn start_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    addr
}

/// A connected WebSocket test client.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        Self { ws }
    }

    pub async fn send(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    /// Sends a raw text frame, bypassing JSON construction.
    pub async fn send_raw(&mut self, raw: &str) {
        self.ws
            .send(Message::Text(raw.to_string().into()))
            .await
            .unwrap();
    }

    /// Best-effort send for flood tests. Returns `false` once the server
    /// has closed the socket.
    pub async fn send_lossy(&mut self, value: Value) -> bool {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .is_ok()
    }

    /// Whether the server closes the socket within `window`.
    pub async fn closed_within(&mut self, window: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match tokio::time::timeout(remaining, self.ws.next()).await {
                Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(Message::Close(_)))) => return true,
                Ok(Some(Ok(_))) => {}
                Err(_) => return false,
            }
        }
    }

    /// Next JSON event, panicking after 5 s of silence.
    pub async fn next_event(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timed out waiting for server event")
                .expect("socket closed")
                .expect("socket error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).expect("event is not JSON");
            }
        }
    }

    /// Collects events until `stop` matches (inclusive).
    pub async fn collect_until<F>(&mut self, mut stop: F) -> Vec<Value>
    where
        F: FnMut(&Value) -> bool,
    {
        let mut events = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = stop(&event);
            events.push(event);
            if done {
                return events;
            }
        }
    }

    /// Skips past the connect-time greeting (`tts_done` for turn 0).
    pub async fn drain_greeting(&mut self) {
        self.collect_until(|e| e["type"] == "tts_done" && e["turn_id"] == 0)
            .await;
    }

    /// Collects events for a fixed quiet period (used to assert absence).
    pub async fn collect_for(&mut self, window: Duration) -> Vec<Value> {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return events;
            }
            match tokio::time::timeout(remaining, self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    events.push(serde_json::from_str(&text).expect("event is not JSON"));
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(_))) | Ok(None) => return events,
                Err(_) => return events,
            }
        }
    }
}

/// Types of `events` filtered down to the given turn.
pub fn types_for_turn(events: &[Value], turn_id: u64) -> Vec<String> {
    events
        .iter()
        .filter(|e| e["turn_id"] == turn_id)
        .map(|e| e["type"].as_str().unwrap_or("").to_string())
        .collect()
}
