//! WebSocket session handling.
//!
//! One session per connected client. The receive loop demultiplexes
//! inbound frames continuously while turn pipelines run as child tasks; a
//! spawned sender task drains the bounded outbound queue so the demux
//! never blocks on a slow client. Out-of-band control (barge-in, ping,
//! ICE) is handled even while a turn is generating or speaking.

use crate::turn::{self, TurnInput};
use crate::webrtc::PeerLink;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tandem_agents::{AgentManager, Persona};
use tandem_state::{ContextSnapshot, ConversationState};
use tandem_types::protocol::{ClientMessage, ServerEvent};
use tandem_types::{AgentId, Speaker, VoiceProfile};
use tandem_voice::CircuitBreaker;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Greeting spoken by Bob when a client connects.
const GREETING: &str = "Hi! I'm Bob, your renovation planning assistant. \
                        What room are you looking to renovate?";

/// Canned re-engagement line spoken after the inactivity window.
const NUDGE: &str = "Still there? Take your time, I'm happy to pick up \
                     wherever we left off.";

/// The currently running turn pipeline, if any.
struct ActiveTurn {
    id: u64,
    cancel: CancellationToken,
    /// Set when the cancellation came from an explicit barge-in, so the
    /// pipeline knows to acknowledge it.
    barged: Arc<std::sync::atomic::AtomicBool>,
}

/// Mutable per-session state. Guarded by a std mutex with short critical
/// sections; never held across an await point.
struct SessionInner {
    agents: AgentManager,
    convo: ConversationState,
    turn_counter: u64,
    active: Option<ActiveTurn>,
    audio_buffer: Vec<u8>,
    deaf_until: Instant,
    checkpoint: Option<String>,
    last_activity: Instant,
    nudged: bool,
    peer: PeerLink,
}

/// One connected client.
pub struct Session {
    pub id: Uuid,
    pub app: Arc<AppState>,
    events: mpsc::Sender<ServerEvent>,
    /// One-slot priority channel for the terminal `error` frame. The
    /// sender task drains it ahead of the regular queue and ahead of the
    /// close, so the client learns why the session ended.
    errors: mpsc::Sender<ServerEvent>,
    inner: Mutex<SessionInner>,
    breaker: CircuitBreaker,
    /// Cancelled to tear the whole session down.
    pub closed: CancellationToken,
}

impl Session {
    pub fn new(
        app: Arc<AppState>,
        events: mpsc::Sender<ServerEvent>,
        errors: mpsc::Sender<ServerEvent>,
    ) -> Self {
        let tts_model = app.config.voice.tts_model.clone();
        let agents = AgentManager::new(
            Persona::bob(VoiceProfile::new(
                app.config.voice.voice_bob.clone(),
                tts_model.clone(),
            )),
            Persona::alice(VoiceProfile::new(
                app.config.voice.voice_alice.clone(),
                tts_model,
            )),
        );
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            app,
            events,
            errors,
            inner: Mutex::new(SessionInner {
                agents,
                convo: ConversationState::new(),
                turn_counter: 0,
                active: None,
                audio_buffer: Vec::new(),
                deaf_until: now,
                checkpoint: None,
                last_activity: now,
                nudged: false,
                peer: PeerLink::new(),
            }),
            breaker: CircuitBreaker::new(),
            closed: CancellationToken::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queues an outbound event. A full queue means a stalled client: the
    /// session closes with an `error`, delivered through the priority
    /// slot since the regular queue has no room left.
    pub fn emit(&self, event: ServerEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::error!(session_id = %self.id, "outbound queue full, closing session");
                let _ = self.errors.try_send(ServerEvent::Error {
                    message: "Outbound event queue overflowed; closing the session.".to_string(),
                });
                self.closed.cancel();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Starts a new turn, superseding and cancelling any active one.
    pub fn begin_turn(&self) -> (u64, CancellationToken) {
        let mut inner = self.lock();
        if let Some(previous) = inner.active.take() {
            previous.cancel.cancel();
        }
        inner.turn_counter += 1;
        inner.audio_buffer.clear();
        let cancel = CancellationToken::new();
        inner.active = Some(ActiveTurn {
            id: inner.turn_counter,
            cancel: cancel.clone(),
            barged: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });
        (inner.turn_counter, cancel)
    }

    /// Clears the active-turn slot if it still belongs to `turn_id`.
    pub fn finish_turn(&self, turn_id: u64) {
        let mut inner = self.lock();
        if inner.active.as_ref().is_some_and(|t| t.id == turn_id) {
            inner.active = None;
        }
    }

    /// Whether the turn that was cancelled had been barged into.
    pub fn was_barged(&self, turn_id: u64) -> bool {
        let inner = self.lock();
        inner
            .active
            .as_ref()
            .filter(|t| t.id == turn_id)
            .is_some_and(|t| t.barged.load(std::sync::atomic::Ordering::SeqCst))
    }

    /// Cancels the active turn on a client barge-in and arms the echo
    /// guard. The pipeline acknowledges once it has stopped emitting.
    pub fn barge_in(&self) {
        let deaf_window = Duration::from_millis(self.app.config.session.deaf_window_ms);
        let mut inner = self.lock();
        inner.deaf_until = Instant::now() + deaf_window;
        inner.audio_buffer.clear();
        if let Some(active) = &inner.active {
            active.barged.store(true, std::sync::atomic::Ordering::SeqCst);
            active.cancel.cancel();
            tracing::info!(session_id = %self.id, turn_id = active.id, "barge-in, cancelling turn");
        } else {
            // Nothing in flight; acknowledge against the latest turn id.
            let turn_id = inner.turn_counter;
            drop(inner);
            self.emit(ServerEvent::BargeInAck { turn_id });
        }
    }

    pub fn is_deaf(&self) -> bool {
        Instant::now() < self.lock().deaf_until
    }

    /// Arms the echo guard after TTS playback ends.
    pub fn arm_deafness(&self) {
        let deaf_window = Duration::from_millis(self.app.config.session.deaf_window_ms);
        self.lock().deaf_until = Instant::now() + deaf_window;
    }

    pub fn note_activity(&self) {
        let mut inner = self.lock();
        inner.last_activity = Instant::now();
        inner.nudged = false;
    }

    pub fn append_audio(&self, chunk: &[u8]) {
        let max = self.app.config.session.max_utterance_bytes;
        let mut inner = self.lock();
        if inner.audio_buffer.len() + chunk.len() <= max * 2 {
            inner.audio_buffer.extend_from_slice(chunk);
        }
    }

    /// Takes the buffered utterance for transcription.
    pub fn take_audio(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().audio_buffer)
    }

    pub fn current_agent(&self) -> AgentId {
        self.lock().agents.current()
    }

    pub fn voice_for(&self, agent: AgentId) -> VoiceProfile {
        self.lock().agents.persona(agent).voice.clone()
    }

    pub fn render_context(&self) -> ContextSnapshot {
        self.lock().convo.render_context()
    }

    /// Switches persona and records the transfer in the tail.
    pub fn switch_agent(&self, target: AgentId) {
        let mut inner = self.lock();
        inner.agents.switch(target);
        inner
            .convo
            .append_turn(Speaker::System, format!("[transferred to {target}]"));
    }

    pub fn build_messages(
        &self,
        user_text: &str,
        handoff: Option<&tandem_agents::HandoffNote>,
        resumed_partial: Option<&str>,
    ) -> Vec<tandem_types::ChatMessage> {
        let inner = self.lock();
        let snapshot = inner.convo.render_context();
        inner
            .agents
            .build_messages(&snapshot, user_text, handoff, resumed_partial)
    }

    pub fn save_checkpoint(&self, partial: &str) {
        self.lock().checkpoint = Some(partial.to_string());
    }

    /// Returns and clears the interrupted-reply checkpoint, recording the
    /// interruption in the tail so the next prompt shows it.
    pub fn take_checkpoint(&self) -> Option<String> {
        let mut inner = self.lock();
        let partial = inner.checkpoint.take()?;
        let speaker = Speaker::from(inner.agents.current());
        inner
            .convo
            .append_turn(speaker, format!("[interrupted mid-reply: {partial}]"));
        Some(partial)
    }

    /// Commits a completed turn: one user entry, one agent entry, the
    /// extractors, and the refreshed summary. Returns the state payload
    /// for the `state_update` event.
    pub fn commit_turn(&self, user_text: &str, reply: &str) -> serde_json::Value {
        let mut inner = self.lock();
        let agent = inner.agents.current();
        inner.convo.append_turn(Speaker::User, user_text);
        inner.convo.append_turn(Speaker::from(agent), reply);
        inner.convo.update_from_user(user_text);
        inner.convo.update_from_agent(reply);
        inner.convo.mark_agent_seen(agent);
        inner.convo.to_json()
    }

    /// Commits only the user's text (blocked replies stay out of state).
    pub fn commit_user_only(&self, user_text: &str) {
        let mut inner = self.lock();
        inner.convo.append_turn(Speaker::User, user_text);
        inner.convo.update_from_user(user_text);
    }

    fn mark_greeted(&self) {
        let mut inner = self.lock();
        inner.convo.mark_agent_seen(AgentId::Bob);
        inner.convo.append_turn(Speaker::System, GREETING);
    }

    /// Handles one inbound text frame. Returns `false` when the envelope
    /// is unparseable and the session must close.
    async fn handle_frame(self: &Arc<Self>, raw: &str) -> bool {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(session_id = %self.id, error = %err, "unparseable frame, closing");
                return false;
            }
        };
        if value.get("type").and_then(|t| t.as_str()).is_none() {
            tracing::warn!(session_id = %self.id, "frame without type field, ignoring");
            return true;
        }

        let message: ClientMessage = match serde_json::from_value(value.clone()) {
            Ok(message) => message,
            Err(_) => {
                tracing::debug!(
                    session_id = %self.id,
                    message_type = value["type"].as_str().unwrap_or(""),
                    "unknown or malformed message, ignoring"
                );
                return true;
            }
        };

        self.note_activity();
        match message {
            ClientMessage::Ping => self.emit(ServerEvent::Pong),
            ClientMessage::AudioChunk { data, .. } => {
                if self.is_deaf() {
                    return true;
                }
                match base64::engine::general_purpose::STANDARD.decode(&data) {
                    Ok(chunk) => self.append_audio(&chunk),
                    Err(_) => {
                        tracing::debug!(session_id = %self.id, "undecodable audio chunk dropped");
                    }
                }
            }
            ClientMessage::EndOfAudio { .. } => {
                let audio = self.take_audio();
                let bounds = &self.app.config.session;
                if audio.len() < bounds.min_utterance_bytes {
                    tracing::debug!(
                        session_id = %self.id,
                        bytes = audio.len(),
                        "utterance too short, skipping"
                    );
                } else if audio.len() > bounds.max_utterance_bytes {
                    tracing::debug!(
                        session_id = %self.id,
                        bytes = audio.len(),
                        "utterance too long, skipping"
                    );
                } else {
                    self.spawn_turn(TurnInput::Audio(audio));
                }
            }
            ClientMessage::TextInput { text, .. } => {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    tracing::info!(session_id = %self.id, "text input");
                    self.spawn_turn(TurnInput::Text(text));
                }
            }
            ClientMessage::BargeIn { .. } => self.barge_in(),
            ClientMessage::TtsPlaybackDone => self.arm_deafness(),
            ClientMessage::WebrtcOffer { sdp } => {
                let answer = self.lock().peer.accept_offer(&sdp);
                if let Some(sdp) = answer {
                    self.emit(ServerEvent::WebrtcAnswer { sdp });
                }
            }
            ClientMessage::IceCandidate { candidate } => {
                self.lock().peer.add_candidate(candidate);
            }
        }
        true
    }

    fn spawn_turn(self: &Arc<Self>, input: TurnInput) {
        let (turn_id, cancel) = self.begin_turn();
        let session = self.clone();
        tokio::spawn(async move {
            turn::run_turn(session.clone(), input, turn_id, cancel).await;
            session.finish_turn(turn_id);
        });
    }

    /// Streams the connect-time greeting in Bob's voice.
    async fn greet(self: Arc<Self>) {
        self.emit(ServerEvent::Connected {
            agent: self.current_agent(),
        });
        self.emit(ServerEvent::LlmToken {
            turn_id: 0,
            token: GREETING.to_string(),
        });
        self.mark_greeted();

        let voice = self.voice_for(AgentId::Bob);
        if let Err(err) =
            turn::speak_span(&self, 0, GREETING, &voice, &self.closed.child_token()).await
        {
            tracing::warn!(session_id = %self.id, error = %err, "greeting synthesis failed");
        }
        self.emit(ServerEvent::TtsDone { turn_id: 0 });
    }

    /// Periodic inactivity check. Speaks a canned nudge (never the LLM)
    /// after the configured quiet window, once per quiet period.
    async fn inactivity_monitor(self: Arc<Self>) {
        let window = Duration::from_secs(self.app.config.session.inactivity_secs);
        loop {
            tokio::select! {
                _ = self.closed.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }

            let due = {
                let mut inner = self.lock();
                if inner.active.is_some() {
                    inner.last_activity = Instant::now();
                    None
                } else if inner.nudged || inner.last_activity.elapsed() < window {
                    None
                } else {
                    inner.nudged = true;
                    inner.turn_counter += 1;
                    Some(inner.turn_counter)
                }
            };
            let Some(turn_id) = due else {
                continue;
            };
            tracing::info!(session_id = %self.id, turn_id, "inactivity nudge");
            self.emit(ServerEvent::LlmToken {
                turn_id,
                token: NUDGE.to_string(),
            });
            let voice = self.voice_for(self.current_agent());
            if let Err(err) =
                turn::speak_span(&self, turn_id, NUDGE, &voice, &self.closed.child_token()).await
            {
                tracing::warn!(session_id = %self.id, error = %err, "nudge synthesis failed");
            }
            self.emit(ServerEvent::TtsDone { turn_id });
        }
    }

    /// Cancels everything this session owns.
    fn shutdown(&self) {
        let mut inner = self.lock();
        if let Some(active) = inner.active.take() {
            active.cancel.cancel();
        }
        drop(inner);
        self.closed.cancel();
    }
}

/// WebSocket handler: `GET /ws`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Writes one event to the socket. Returns `false` when the socket is
/// gone.
async fn send_event(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, AxumMessage>,
    event: &ServerEvent,
) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize outbound event");
            return true;
        }
    };
    ws_tx.send(AxumMessage::Text(json.into())).await.is_ok()
}

/// Handles the WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (events_tx, mut events_rx) =
        mpsc::channel::<ServerEvent>(state.config.session.outbound_queue);
    let (errors_tx, mut errors_rx) = mpsc::channel::<ServerEvent>(1);
    let session = Arc::new(Session::new(state.clone(), events_tx, errors_tx));
    state.sessions.add(session.id).await;
    tracing::info!(session_id = %session.id, "session connected");

    // Forward queued events to the socket. A terminal error frame takes
    // priority over queued events and goes out before the close.
    let closed = session.closed.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = errors_rx.recv() => {
                    if let Some(event) = event {
                        send_event(&mut ws_tx, &event).await;
                    }
                    break;
                }
                _ = closed.cancelled() => {
                    // An error queued right before shutdown still goes out
                    // ahead of the close.
                    if let Ok(event) = errors_rx.try_recv() {
                        send_event(&mut ws_tx, &event).await;
                    }
                    break;
                }
                event = events_rx.recv() => match event {
                    Some(event) => {
                        if !send_event(&mut ws_tx, &event).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    tokio::spawn(session.clone().greet());
    tokio::spawn(session.clone().inactivity_monitor());

    loop {
        tokio::select! {
            _ = session.closed.cancelled() => break,
            frame = ws_rx.next() => match frame {
                Some(Ok(AxumMessage::Text(text))) => {
                    if !session.handle_frame(&text).await {
                        break;
                    }
                }
                Some(Ok(AxumMessage::Close(_))) | None => break,
                Some(Ok(_)) => {} // binary and control frames are ignored
                Some(Err(err)) => {
                    tracing::warn!(session_id = %session.id, error = %err, "socket error");
                    break;
                }
            }
        }
    }

    session.shutdown();
    state.sessions.remove(&session.id).await;
    // Grace period for the sender to flush a terminal error frame; a
    // stalled client cannot hold the connection open past it.
    if tokio::time::timeout(Duration::from_secs(1), &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
    tracing::info!(session_id = %session.id, "session disconnected");
}
