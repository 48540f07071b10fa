//! Tandem server library logic.
//!
//! Wires the provider adapters, the session registry, and the HTTP/WS
//! routes into an axum application. One WebSocket connection is one
//! session; everything mutable is scoped to it.

pub mod config;
pub mod session;
pub mod turn;
pub mod webrtc;

use axum::{routing::get, Extension, Json, Router};
use config::Config;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tandem_voice::{
    Guardrail, LanguageModel, Moderation, OpenAiLlm, OpenAiStt, OpenAiTts, SpeechToText,
    TextToSpeech,
};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Tracks the ids of live sessions for the debug endpoint.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    ids: Arc<RwLock<HashSet<Uuid>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, id: Uuid) {
        self.ids.write().await.insert(id);
    }

    pub async fn remove(&self, id: &Uuid) {
        self.ids.write().await.remove(id);
    }

    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ids.read().await.iter().map(Uuid::to_string).collect();
        ids.sort();
        ids
    }
}

/// Application state shared across all request handlers.
///
/// The adapters are stateless and shared by every session; per-session
/// state lives inside each [`session::Session`].
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// Speech-to-text adapter.
    pub stt: Arc<dyn SpeechToText>,
    /// Language model adapter.
    pub llm: Arc<dyn LanguageModel>,
    /// Text-to-speech adapter.
    pub tts: Arc<dyn TextToSpeech>,
    /// Content moderation adapter.
    pub moderation: Arc<dyn Moderation>,
    /// Live session ids.
    pub sessions: SessionRegistry,
}

impl AppState {
    /// Builds the state with the OpenAI-compatible production adapters.
    pub fn with_default_adapters(config: Config) -> Self {
        let provider = Arc::new(config.voice.provider.clone());
        Self {
            config,
            stt: Arc::new(OpenAiStt::new(provider.clone())),
            llm: Arc::new(OpenAiLlm::new(provider.clone())),
            tts: Arc::new(OpenAiTts::new(provider.clone())),
            moderation: Arc::new(Guardrail::new(provider)),
            sessions: SessionRegistry::new(),
        }
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Debug endpoint: lists active session ids.
async fn sessions(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "active_sessions": state.sessions.list().await,
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(sessions))
        .route("/ws", get(session::ws_handler))
        .layer(Extension(Arc::new(state)))
}
