//! Shared types and constants for the Tandem voice platform.
//!
//! This crate provides the foundational types used across all Tandem crates:
//! agent (persona) identifiers, transcript entries, voice profiles, chat
//! messages, and the client/server wire protocol.
//!
//! No crate in the workspace depends on anything *except* `tandem-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

pub mod protocol;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one of the two conversational personas.
///
/// `Bob` handles intake and planning; `Alice` is the technical specialist.
/// Every session starts with Bob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentId {
    Bob,
    Alice,
}

impl AgentId {
    /// Returns the lowercase wire name for this agent.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bob => "bob",
            Self::Alice => "alice",
        }
    }

    /// Returns the human-facing display name.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Bob => "Bob",
            Self::Alice => "Alice",
        }
    }

    /// Returns the other persona.
    pub fn other(self) -> Self {
        match self {
            Self::Bob => Self::Alice,
            Self::Alice => Self::Bob,
        }
    }

    /// Attempts to parse a lowercase wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "bob" => Some(Self::Bob),
            "alice" => Some(Self::Alice),
            _ => None,
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Bob,
    Alice,
    System,
}

impl From<AgentId> for Speaker {
    fn from(agent: AgentId) -> Self {
        match agent {
            AgentId::Bob => Self::Bob,
            AgentId::Alice => Self::Alice,
        }
    }
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bob => "bob",
            Self::Alice => "alice",
            Self::System => "system",
        }
    }
}

/// One entry in the per-session transcript tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Default TTS voice for Bob.
pub const DEFAULT_VOICE_BOB: &str = "alloy";
/// Default TTS voice for Alice.
pub const DEFAULT_VOICE_ALICE: &str = "shimmer";
/// Default TTS model.
pub const DEFAULT_TTS_MODEL: &str = "tts-1";

/// A voice profile configuration.
///
/// Maps a persona to a provider voice name and synthesis model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// Provider voice identifier (e.g. `alloy`, `shimmer`).
    pub voice: String,
    /// Synthesis model identifier.
    pub model: String,
}

impl VoiceProfile {
    pub fn new(voice: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
            model: model.into(),
        }
    }

    /// Returns the built-in default profile for the given agent.
    pub fn default_for(agent: AgentId) -> Self {
        let voice = match agent {
            AgentId::Bob => DEFAULT_VOICE_BOB,
            AgentId::Alice => DEFAULT_VOICE_ALICE,
        };
        Self::new(voice, DEFAULT_TTS_MODEL)
    }
}

/// Role of a chat message sent to the language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a language-model conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_round_trips_through_wire_name() {
        for agent in [AgentId::Bob, AgentId::Alice] {
            assert_eq!(AgentId::parse(agent.as_str()), Some(agent));
        }
        assert_eq!(AgentId::parse("carol"), None);
    }

    #[test]
    fn agent_id_other_flips() {
        assert_eq!(AgentId::Bob.other(), AgentId::Alice);
        assert_eq!(AgentId::Alice.other(), AgentId::Bob);
    }

    #[test]
    fn speaker_serializes_lowercase() {
        let entry = TranscriptEntry::new(Speaker::from(AgentId::Alice), "hello");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["speaker"], "alice");
    }
}
