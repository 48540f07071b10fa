//! Per-session conversation memory.
//!
//! Maintains structured project state, a rolling summary, and a bounded
//! transcript tail across turns and agent transfers. Everything here is pure
//! in-memory state owned by exactly one session; nothing is shared across
//! sessions and nothing survives a disconnect.
//!
//! Facts are pulled out of utterances by the deterministic heuristics in
//! [`extract`] (regex and keyword scans only, no model calls), so the same
//! conversation always produces the same state.

pub mod extract;

use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use tandem_types::{AgentId, Speaker, TranscriptEntry};

/// Maximum number of entries retained in the transcript tail.
pub const N_TAIL: usize = 12;

/// Soft cap on the rolling summary length, in characters.
pub const SUMMARY_MAX_CHARS: usize = 240;

/// Cap on the number of extracted goals.
pub const MAX_GOALS: usize = 8;

/// Structured facts about the renovation project.
///
/// `budget` is the literal matched slice from the user's utterance (e.g.
/// `"$25k"`), never parsed numerically.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectState {
    pub room: Option<String>,
    pub budget: Option<String>,
    pub timeline: Option<String>,
    pub diy_or_contractor: Option<String>,
    pub goals: Vec<String>,
    pub constraints: Vec<String>,
}

/// A frozen view of the conversation used to build prompts.
///
/// Taken at the start of a turn so that concurrent mutation (there is none
/// within a session, but the snapshot makes that a non-issue) can never skew
/// what the model sees.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub project: ProjectState,
    pub open_questions: Vec<String>,
    pub risks: Vec<String>,
    pub summary: String,
    pub recent_transcript: Vec<TranscriptEntry>,
    pub agent_seen: HashSet<AgentId>,
}

impl ContextSnapshot {
    /// Pretty-printed project JSON for prompt context.
    pub fn project_json(&self) -> String {
        serde_json::to_string_pretty(&self.project).unwrap_or_else(|_| "{}".to_string())
    }

    /// The most recent user utterance in the tail, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.recent_transcript
            .iter()
            .rev()
            .find(|entry| entry.speaker == Speaker::User)
            .map(|entry| entry.text.as_str())
    }
}

/// Conversation state for one session.
#[derive(Debug, Default)]
pub struct ConversationState {
    pub project: ProjectState,
    pub open_questions: Vec<String>,
    pub risks: Vec<String>,
    pub decisions: Vec<String>,
    pub materials_discussed: Vec<String>,
    summary: String,
    transcript_tail: VecDeque<TranscriptEntry>,
    agent_seen: HashSet<AgentId>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one turn to the tail, evicting the oldest entry past
    /// [`N_TAIL`].
    pub fn append_turn(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.transcript_tail
            .push_back(TranscriptEntry::new(speaker, text));
        while self.transcript_tail.len() > N_TAIL {
            self.transcript_tail.pop_front();
        }
    }

    /// Runs the user-utterance extractors and refreshes the rolling summary.
    pub fn update_from_user(&mut self, text: &str) {
        extract::apply_user_utterance(&mut self.project, text);
        self.rebuild_summary();
    }

    /// Runs the agent-reply extractors (risk phrases) and refreshes the
    /// rolling summary.
    pub fn update_from_agent(&mut self, text: &str) {
        for risk in extract::risk_phrases(text) {
            push_unique(&mut self.risks, &risk);
        }
        self.rebuild_summary();
    }

    /// Marks that a persona has greeted the user. Never un-marked.
    pub fn mark_agent_seen(&mut self, agent: AgentId) {
        self.agent_seen.insert(agent);
    }

    pub fn has_seen(&self, agent: AgentId) -> bool {
        self.agent_seen.contains(&agent)
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn transcript_tail(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.transcript_tail.iter()
    }

    /// Freezes the state into a snapshot for prompt construction.
    pub fn render_context(&self) -> ContextSnapshot {
        ContextSnapshot {
            project: self.project.clone(),
            open_questions: self.open_questions.clone(),
            risks: self.risks.clone(),
            summary: self.summary.clone(),
            recent_transcript: self.transcript_tail.iter().cloned().collect(),
            agent_seen: self.agent_seen.clone(),
        }
    }

    /// Structured state payload for the `state_update` event.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "project": self.project,
            "open_questions": self.open_questions,
            "risks": self.risks,
            "decisions": self.decisions,
            "materials_discussed": self.materials_discussed,
        })
    }

    /// Regenerates the rolling summary from the project facts and risks.
    fn rebuild_summary(&mut self) {
        let room = self.project.room.as_deref().unwrap_or("unknown room");
        let budget = self.project.budget.as_deref().unwrap_or("unknown");
        let goals = if self.project.goals.is_empty() {
            "unclear".to_string()
        } else {
            self.project.goals.join(", ")
        };
        let mut summary = format!("Renovating {room}, budget {budget}, wants: {goals}.");
        if !self.risks.is_empty() {
            summary.push_str(&format!(" risks: {}.", self.risks.join(", ")));
        }
        self.summary = clamp_chars(&summary, SUMMARY_MAX_CHARS);
    }
}

/// Appends `item` unless an entry already matches case-insensitively.
/// Insertion order is preserved.
pub(crate) fn push_unique(list: &mut Vec<String>, item: &str) {
    let item = item.trim();
    if item.is_empty() {
        return;
    }
    if list.iter().any(|existing| existing.eq_ignore_ascii_case(item)) {
        return;
    }
    list.push(item.to_string());
}

fn clamp_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}
