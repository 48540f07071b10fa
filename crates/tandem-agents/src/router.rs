//! Rule-based transfer detection.
//!
//! Evaluated on the raw user utterance before any model call. Detection is
//! a pure function of the text and the current agent: deterministic,
//! case-insensitive, and never consulting the LLM.

use regex::Regex;
use std::sync::LazyLock;
use tandem_types::AgentId;

static TO_ALICE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"transfer.*alice",
        r"(?:let me |can i )?(?:talk|speak) (?:to|with) alice",
        r"bring (?:in )?alice",
        r"bring alice in",
        r"switch.*alice",
        r"(?:go )?(?:back )?to alice",
        r"connect.*alice",
        r"put alice on",
        r"i (?:want|need) alice",
    ])
});

static TO_BOB: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"transfer.*bob",
        r"(?:let me |can i )?(?:talk|speak) (?:to|with) bob",
        r"bring (?:in )?bob",
        r"bring bob in",
        r"switch.*bob",
        r"(?:go )?back.*bob",
        r"(?:go )?(?:back )?to bob",
        r"return.*bob",
        r"connect.*bob",
        r"put bob on",
        r"i (?:want|need) bob",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("transfer pattern"))
        .collect()
}

/// Detects explicit transfer intent in a user utterance.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferRouter;

impl TransferRouter {
    pub fn new() -> Self {
        Self
    }

    /// Returns the transfer target, if the utterance explicitly asks for
    /// one.
    ///
    /// A request for the already-active agent is a no-op (`None`), and an
    /// utterance matching both personas is treated as ambiguous (`None`).
    pub fn detect(&self, text: &str, current: AgentId) -> Option<AgentId> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let wants_alice = TO_ALICE.iter().any(|re| re.is_match(text));
        let wants_bob = TO_BOB.iter().any(|re| re.is_match(text));

        let target = match (wants_alice, wants_bob) {
            (true, true) | (false, false) => return None,
            (true, false) => AgentId::Alice,
            (false, true) => AgentId::Bob,
        };

        if target == current {
            None
        } else {
            Some(target)
        }
    }
}
