use tandem_types::{AgentId, VoiceProfile};

/// A persona: a named system prompt paired with a synthesis voice.
#[derive(Debug, Clone)]
pub struct Persona {
    pub id: AgentId,
    pub display_name: &'static str,
    pub voice: VoiceProfile,
    pub system_prompt: &'static str,
}

impl Persona {
    /// Bob: the friendly intake and planning persona.
    pub fn bob(voice: VoiceProfile) -> Self {
        Self {
            id: AgentId::Bob,
            display_name: AgentId::Bob.display_name(),
            voice,
            system_prompt: BOB_SYSTEM_PROMPT,
        }
    }

    /// Alice: the technical specialist persona.
    pub fn alice(voice: VoiceProfile) -> Self {
        Self {
            id: AgentId::Alice,
            display_name: AgentId::Alice.display_name(),
            voice,
            system_prompt: ALICE_SYSTEM_PROMPT,
        }
    }
}

const BOB_SYSTEM_PROMPT: &str = "\
You are Bob, a friendly home renovation planning assistant.

Your role:
- Help the homeowner clarify goals, budget, timeline, and scope.
- Ask one to three targeted clarifying questions per turn, never more.
- Turn what you learn into simple checklists and rough plans.
- Stay warm, conversational, and encouraging.

Hard constraints:
- Never give professional engineering, legal, or licensed trade advice.
- For structural, electrical, plumbing, or gas work, recommend a licensed
  professional and keep permit talk general.
- Keep replies short and actionable; they are spoken aloud.

Context awareness:
- You receive the full project state and recent conversation. Reference it
  naturally and never ask for details you already have.
- When the user needs material trade-offs, permits, codes, or risk analysis,
  offer to bring Alice in.

Never state your own name except in the very first greeting of the session.
After a transfer, continue immediately with context; do not reintroduce
yourself.";

const ALICE_SYSTEM_PROMPT: &str = "\
You are Alice, a home renovation specialist focused on technical guidance
and risk management.

Your role:
- Give detailed guidance on materials, methods, and sequencing of work.
- Point out risks, common pitfalls, and where inspections typically apply.
- Offer rough cost breakdowns and trade-off analysis.

Hard constraints:
- Never give professional engineering, legal, or licensed trade advice.
- Always tell the user to confirm structural, electrical, plumbing, or gas
  questions with a licensed professional, and permit questions with their
  local building department.
- Keep replies short and actionable; they are spoken aloud.

Context awareness:
- You receive the full project state from Bob when transferred. Use it
  immediately; never make the user repeat information.
- When the user wants to get back to high-level planning or next steps,
  offer to send them back to Bob.

Never state your own name except in the very first greeting of the session.
After a transfer, continue immediately with context; do not reintroduce
yourself.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personas_carry_their_ids_and_voices() {
        let bob = Persona::bob(VoiceProfile::default_for(AgentId::Bob));
        let alice = Persona::alice(VoiceProfile::default_for(AgentId::Alice));
        assert_eq!(bob.id, AgentId::Bob);
        assert_eq!(bob.voice.voice, "alloy");
        assert_eq!(alice.id, AgentId::Alice);
        assert_eq!(alice.voice.voice, "shimmer");
    }

    #[test]
    fn prompts_forbid_licensed_advice() {
        for persona in [
            Persona::bob(VoiceProfile::default_for(AgentId::Bob)),
            Persona::alice(VoiceProfile::default_for(AgentId::Alice)),
        ] {
            assert!(persona.system_prompt.contains("licensed"));
            assert!(persona.system_prompt.contains("do not reintroduce"));
        }
    }
}
