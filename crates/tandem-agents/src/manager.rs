//! Persona switching and prompt assembly.

use crate::Persona;
use tandem_state::ContextSnapshot;
use tandem_types::{AgentId, ChatMessage};

/// One-turn prompt addendum handed to the incoming persona on transfer.
///
/// Rendered into a single system message for the first reply after the
/// switch, then discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffNote {
    pub what_we_know: Vec<String>,
    pub open_questions: Vec<String>,
    pub known_risks: Vec<String>,
    pub last_user_message: Option<String>,
    pub recommended_focus: String,
}

impl HandoffNote {
    /// Renders the note as prompt text.
    pub fn render(&self) -> String {
        let mut out = String::from("HANDOFF NOTE\n");
        if !self.what_we_know.is_empty() {
            out.push_str("What we know:\n");
            for fact in &self.what_we_know {
                out.push_str(&format!("- {fact}\n"));
            }
        }
        if !self.open_questions.is_empty() {
            out.push_str(&format!(
                "Open questions: {}\n",
                self.open_questions.join(", ")
            ));
        }
        if !self.known_risks.is_empty() {
            out.push_str(&format!("Known risks: {}\n", self.known_risks.join(", ")));
        }
        if let Some(last) = &self.last_user_message {
            out.push_str(&format!("Last user message: {last}\n"));
        }
        out.push_str(&format!("Recommended focus: {}\n", self.recommended_focus));
        out
    }
}

/// Owns the two persona records and the session's current persona.
#[derive(Debug, Clone)]
pub struct AgentManager {
    current: AgentId,
    bob: Persona,
    alice: Persona,
}

impl AgentManager {
    /// Creates a manager starting on Bob.
    pub fn new(bob: Persona, alice: Persona) -> Self {
        Self {
            current: AgentId::Bob,
            bob,
            alice,
        }
    }

    pub fn current(&self) -> AgentId {
        self.current
    }

    pub fn persona(&self, agent: AgentId) -> &Persona {
        match agent {
            AgentId::Bob => &self.bob,
            AgentId::Alice => &self.alice,
        }
    }

    pub fn current_persona(&self) -> &Persona {
        self.persona(self.current)
    }

    /// Switches the active persona. Does not touch the agent-seen set.
    pub fn switch(&mut self, target: AgentId) {
        self.current = target;
    }

    /// The short sentence the *outgoing* persona speaks while handing off.
    pub fn acknowledgement(target: AgentId) -> &'static str {
        match target {
            AgentId::Alice => "Bringing Alice in. She can help with the technical details.",
            AgentId::Bob => "Switching back to Bob. He'll help you with next steps.",
        }
    }

    /// Builds the handoff note for a transfer to `target`.
    ///
    /// Pure function of the snapshot and the utterance that triggered the
    /// transfer.
    pub fn handoff_note(
        snapshot: &ContextSnapshot,
        last_user_text: &str,
        target: AgentId,
    ) -> HandoffNote {
        let mut what_we_know = Vec::new();
        let project = &snapshot.project;
        if let Some(room) = &project.room {
            what_we_know.push(format!("Room: {room}"));
        }
        if let Some(budget) = &project.budget {
            what_we_know.push(format!("Budget: {budget}"));
        }
        if let Some(timeline) = &project.timeline {
            what_we_know.push(format!("Timeline: {timeline}"));
        }
        if !project.goals.is_empty() {
            what_we_know.push(format!("Goals: {}", project.goals.join(", ")));
        }
        if !project.constraints.is_empty() {
            what_we_know.push(format!("Constraints: {}", project.constraints.join(", ")));
        }

        let recommended_focus = match target {
            AgentId::Alice => {
                "Address technical risks, permits, sequencing and material trade-offs."
            }
            AgentId::Bob => "Produce a homeowner-friendly checklist and next steps.",
        };

        HandoffNote {
            what_we_know,
            open_questions: snapshot.open_questions.clone(),
            known_risks: snapshot.risks.clone(),
            last_user_message: Some(last_user_text.to_string()),
            recommended_focus: recommended_focus.to_string(),
        }
    }

    /// Assembles the message list for the language model.
    ///
    /// Order: persona system prompt, context system message, the handoff
    /// note (transfers only, one turn), the interrupted-reply note (after a
    /// barge-in only), the suppress-intro reminder for already-seen
    /// personas, then the user message.
    pub fn build_messages(
        &self,
        snapshot: &ContextSnapshot,
        user_text: &str,
        handoff: Option<&HandoffNote>,
        resumed_partial: Option<&str>,
    ) -> Vec<ChatMessage> {
        let persona = self.current_persona();
        let mut messages = vec![ChatMessage::system(persona.system_prompt)];

        let mut context = String::from("PROJECT STATE:\n");
        context.push_str(&snapshot.project_json());
        if !snapshot.summary.is_empty() {
            context.push_str(&format!("\n\nCONVERSATION SUMMARY:\n{}", snapshot.summary));
        }
        if !snapshot.recent_transcript.is_empty() {
            context.push_str("\n\nRECENT CONVERSATION:");
            for entry in &snapshot.recent_transcript {
                context.push_str(&format!(
                    "\n{}: {}",
                    entry.speaker.as_str().to_uppercase(),
                    entry.text
                ));
            }
        }
        messages.push(ChatMessage::system(context));

        if let Some(note) = handoff {
            let mut rendered = note.render();
            rendered.push_str("\nContinue immediately. Do not reintroduce yourself.");
            messages.push(ChatMessage::system(rendered));
        }

        if let Some(partial) = resumed_partial {
            messages.push(ChatMessage::system(format!(
                "Your previous reply was interrupted mid-sentence. You had said: \
                 \"{partial}\". Take it into account and continue naturally."
            )));
        }

        if snapshot.agent_seen.contains(&persona.id) {
            messages.push(ChatMessage::system(
                "You have already introduced yourself in this session. \
                 Do not say your name or greet again; just continue.",
            ));
        }

        messages.push(ChatMessage::user(user_text));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_state::ConversationState;
    use tandem_types::{Role, Speaker, VoiceProfile};

    fn manager() -> AgentManager {
        AgentManager::new(
            Persona::bob(VoiceProfile::default_for(AgentId::Bob)),
            Persona::alice(VoiceProfile::default_for(AgentId::Alice)),
        )
    }

    fn intake_state() -> ConversationState {
        let mut state = ConversationState::new();
        state.append_turn(Speaker::User, "I want to remodel my kitchen, budget $25k");
        state.update_from_user("I want to remodel my kitchen, budget $25k");
        state
    }

    #[test]
    fn starts_on_bob_and_switches() {
        let mut manager = manager();
        assert_eq!(manager.current(), AgentId::Bob);
        manager.switch(AgentId::Alice);
        assert_eq!(manager.current(), AgentId::Alice);
        assert_eq!(manager.current_persona().id, AgentId::Alice);
    }

    #[test]
    fn handoff_note_carries_project_facts() {
        let state = intake_state();
        let note = AgentManager::handoff_note(
            &state.render_context(),
            "Transfer me to Alice",
            AgentId::Alice,
        );
        let rendered = note.render();
        assert!(rendered.contains("Room: kitchen"), "{rendered}");
        assert!(rendered.contains("Budget: $25k"), "{rendered}");
        assert!(rendered.contains("Last user message: Transfer me to Alice"));
        assert!(rendered.contains("technical risks"));
    }

    #[test]
    fn handoff_focus_depends_on_target() {
        let state = ConversationState::new();
        let to_bob =
            AgentManager::handoff_note(&state.render_context(), "back to bob", AgentId::Bob);
        assert!(to_bob.recommended_focus.contains("checklist"));
    }

    #[test]
    fn build_messages_orders_sections() {
        let mut manager = manager();
        manager.switch(AgentId::Alice);
        let state = intake_state();
        let snapshot = state.render_context();
        let note = AgentManager::handoff_note(&snapshot, "transfer to alice", AgentId::Alice);

        let messages = manager.build_messages(&snapshot, "what about permits?", Some(&note), None);

        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("Alice"));
        assert!(messages[1].content.contains("PROJECT STATE"));
        assert!(messages[2].content.contains("HANDOFF NOTE"));
        assert!(messages[2].content.contains("Do not reintroduce yourself."));
        let last = messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, "what about permits?");
    }

    #[test]
    fn handoff_note_appears_only_when_passed() {
        let manager = manager();
        let state = intake_state();
        let snapshot = state.render_context();
        let messages = manager.build_messages(&snapshot, "hello", None, None);
        assert!(messages.iter().all(|m| !m.content.contains("HANDOFF NOTE")));
    }

    #[test]
    fn seen_persona_gets_intro_suppression() {
        let manager = manager();
        let mut state = intake_state();
        state.mark_agent_seen(AgentId::Bob);
        let messages = manager.build_messages(&state.render_context(), "hi again", None, None);
        assert!(messages
            .iter()
            .any(|m| m.content.contains("already introduced")));
    }

    #[test]
    fn interrupted_partial_is_injected() {
        let manager = manager();
        let state = intake_state();
        let messages = manager.build_messages(
            &state.render_context(),
            "go on",
            None,
            Some("You should start by"),
        );
        assert!(messages
            .iter()
            .any(|m| m.content.contains("You should start by")));
    }
}
