//! Deterministic extraction heuristics.
//!
//! Regex and keyword scans that pull project facts out of raw utterances.
//! Scalar fields (`room`, `budget`, `timeline`, `diy_or_contractor`) are
//! set-once: the first match across the conversation wins. List fields
//! (`goals`, `risks`) accumulate in insertion order with case-insensitive
//! de-duplication.

use crate::{push_unique, ProjectState, MAX_GOALS};
use regex::Regex;
use std::sync::LazyLock;

/// Room vocabulary, multi-word entries first so they win over substrings.
const ROOMS: &[&str] = &[
    "living room",
    "dining room",
    "laundry room",
    "kitchen",
    "bathroom",
    "bedroom",
    "basement",
    "garage",
    "attic",
    "hallway",
];

/// Keywords that mark an agent reply as raising a risk worth tracking.
const RISK_TERMS: &[&str] = &[
    "load-bearing",
    "load bearing",
    "permit",
    "inspection",
    "asbestos",
    "electrical panel",
    "structural",
];

static BUDGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\d+(?:,\d{3})*k?|\b\d+\s?(?:k|thousand|dollars)\b").expect("budget regex")
});

static TIMELINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\d+\s?(?:days?|weeks?|months?)\b").expect("timeline regex"));

static GOAL_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:i|we)(?:'d| would)? (?:want|like|need)\b|\b(?:looking|planning|hoping) to\b")
        .expect("goal marker regex")
});

/// Applies every user-utterance extractor to `project`.
pub fn apply_user_utterance(project: &mut ProjectState, text: &str) {
    let lower = text.to_lowercase();

    if project.room.is_none() {
        project.room = first_room(&lower);
    }
    if project.budget.is_none() {
        project.budget = BUDGET_RE.find(text).map(|m| m.as_str().to_string());
    }
    if project.timeline.is_none() {
        project.timeline = TIMELINE_RE.find(text).map(|m| m.as_str().to_string());
    }
    if project.diy_or_contractor.is_none() {
        project.diy_or_contractor = diy_or_contractor(&lower);
    }

    for goal in goal_snippets(text) {
        if project.goals.len() >= MAX_GOALS {
            break;
        }
        push_unique(&mut project.goals, &goal);
    }
}

/// Earliest room-vocabulary match in the (lowercased) utterance.
fn first_room(lower: &str) -> Option<String> {
    ROOMS
        .iter()
        .filter_map(|room| lower.find(room).map(|pos| (pos, *room)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, room)| room.to_string())
}

fn diy_or_contractor(lower: &str) -> Option<String> {
    const DIY: &[&str] = &["myself", "diy", "on my own"];
    const CONTRACTOR: &[&str] = &["contractor", "hiring", "hire someone"];
    if DIY.iter().any(|kw| lower.contains(kw)) {
        Some("diy".to_string())
    } else if CONTRACTOR.iter().any(|kw| lower.contains(kw)) {
        Some("contractor".to_string())
    } else {
        None
    }
}

/// Risk phrases present in an agent reply, in order of appearance.
pub fn risk_phrases(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut found: Vec<(usize, &str)> = RISK_TERMS
        .iter()
        .filter_map(|term| lower.find(term).map(|pos| (pos, *term)))
        .collect();
    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, term)| term.to_string()).collect()
}

/// Short goal snippets from clauses following a desire marker
/// ("I want ...", "we'd like ...", "planning to ...").
///
/// The clause up to the next sentence terminator is split on commas and
/// "and", leading filler words are stripped, and fragments outside 3..=48
/// characters are dropped.
pub fn goal_snippets(text: &str) -> Vec<String> {
    let mut snippets = Vec::new();
    for marker in GOAL_MARKER_RE.find_iter(text) {
        let rest = &text[marker.end()..];
        let clause_end = rest
            .find(['.', '!', '?', '\n'])
            .unwrap_or(rest.len());
        let clause = &rest[..clause_end];

        for piece in clause.split(',') {
            for fragment in piece.split(" and ") {
                if let Some(snippet) = clean_goal_fragment(fragment) {
                    snippets.push(snippet);
                }
            }
        }
    }
    snippets
}

fn clean_goal_fragment(fragment: &str) -> Option<String> {
    let mut rest = fragment.trim();
    // Strip leading connectives and filler, repeatedly, so that
    // "and maybe open up a wall" reduces to "open up a wall".
    const FILLERS: &[&str] = &["and ", "maybe ", "also ", "to ", "just ", "some "];
    loop {
        let before = rest;
        for filler in FILLERS {
            if let Some(stripped) = rest.strip_prefix(filler) {
                rest = stripped.trim_start();
            }
        }
        if rest == before {
            break;
        }
    }
    let rest = rest.trim_end_matches(['.', '!', '?']).trim();
    if (3..=48).contains(&rest.len()) {
        Some(rest.to_string())
    } else {
        None
    }
}
