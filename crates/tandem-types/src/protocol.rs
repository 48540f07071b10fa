//! Client/server wire protocol.
//!
//! JSON objects over a bidirectional text channel, one message per frame,
//! tagged by `type`. Every outbound event that belongs to a turn carries the
//! `turn_id` it was generated for; clients discard events whose `turn_id` is
//! older than their current turn counter.

use crate::AgentId;
use serde::{Deserialize, Serialize};

/// Messages from the client to the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keepalive; the server replies with [`ServerEvent::Pong`].
    Ping,
    /// Base64 PCM16LE 16 kHz mono audio appended to the active utterance.
    AudioChunk {
        data: String,
        #[serde(default)]
        turn_id: Option<u64>,
    },
    /// Flush the audio buffer and begin transcription.
    EndOfAudio {
        #[serde(default)]
        turn_id: Option<u64>,
    },
    /// Synthetic user turn that skips transcription.
    TextInput {
        text: String,
        #[serde(default)]
        turn_id: Option<u64>,
    },
    /// Cancel the current turn.
    BargeIn {
        #[serde(default)]
        turn_id: Option<u64>,
    },
    /// The client has drained all queued audio.
    TtsPlaybackDone,
    /// SDP offer relayed to the WebRTC subsystem.
    WebrtcOffer { sdp: String },
    /// ICE candidate relayed to the WebRTC subsystem.
    IceCandidate { candidate: serde_json::Value },
}

/// Events from the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        agent: AgentId,
    },
    Pong,
    SttProcessing {
        turn_id: u64,
    },
    PartialTranscript {
        turn_id: u64,
        text: String,
    },
    FinalTranscript {
        turn_id: u64,
        text: String,
        latency_ms: u64,
    },
    LlmToken {
        turn_id: u64,
        token: String,
    },
    TtsChunk {
        turn_id: u64,
        /// Base64-encoded audio in the container format the synthesis
        /// stream announced.
        audio: String,
    },
    TtsDone {
        turn_id: u64,
    },
    AgentChange {
        agent: AgentId,
    },
    BargeInAck {
        turn_id: u64,
    },
    CheckpointSaved {
        partial: String,
    },
    GuardrailBlocked {
        reason: String,
    },
    StateUpdate {
        state: serde_json::Value,
    },
    Error {
        message: String,
    },
    WebrtcAnswer {
        sdp: String,
    },
}

impl ServerEvent {
    /// Returns the turn this event belongs to, if it is turn-scoped.
    pub fn turn_id(&self) -> Option<u64> {
        match self {
            Self::SttProcessing { turn_id }
            | Self::PartialTranscript { turn_id, .. }
            | Self::FinalTranscript { turn_id, .. }
            | Self::LlmToken { turn_id, .. }
            | Self::TtsChunk { turn_id, .. }
            | Self::TtsDone { turn_id }
            | Self::BargeInAck { turn_id } => Some(*turn_id),
            _ => None,
        }
    }
}
