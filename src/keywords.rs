//! Keyword sets behind the context-tagging and due-date heuristics.
//!
//! Each set compiles to one case-insensitive, word-bounded regex.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

pub struct KeywordSet {
    regex: Option<Regex>,
}

impl KeywordSet {
    /// Compile a word list. An invalid pattern is logged and the set then
    /// never matches.
    pub fn compile(name: &'static str, words: &[&str]) -> Self {
        let alternation = words
            .iter()
            .map(|w| regex::escape(w))
            .collect::<Vec<_>>()
            .join("|");
        let regex = match Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Skipping invalid keyword set '{}': {}", name, e);
                None
            }
        };
        Self { regex }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.as_ref().is_some_and(|r| r.is_match(text))
    }
}

/// Routine work that suits a low-energy slot.
pub static ADMIN: Lazy<KeywordSet> = Lazy::new(|| {
    KeywordSet::compile(
        "admin",
        &[
            "email", "emails", "e-mail", "form", "forms", "register", "registers", "admin",
            "paperwork", "print", "photocopy", "photocopying",
        ],
    )
});

/// People whose requests should not wait.
pub static STAKEHOLDER: Lazy<KeywordSet> = Lazy::new(|| {
    KeywordSet::compile(
        "stakeholder",
        &[
            "headteacher", "head teacher", "headmaster", "headmistress", "principal", "governor",
            "governors", "parent", "parents", "carer", "carers", "inspector", "inspectors",
            "ofsted", "ceo", "trustee", "trustees", "local authority",
        ],
    )
});

/// Work that moves the department forward.
pub static HIGH_IMPACT: Lazy<KeywordSet> = Lazy::new(|| {
    KeywordSet::compile(
        "high_impact",
        &[
            "strategy", "strategic", "curriculum", "vision", "improvement plan",
            "development plan", "sdp", "outcomes", "recruitment", "restructure",
            "self-evaluation", "sef", "intervention",
        ],
    )
});

/// Time-estimate cues, checked in this order.
pub static TIME_CUES: Lazy<Vec<(KeywordSet, u32)>> = Lazy::new(|| {
    vec![
        (
            KeywordSet::compile("five_minutes", &["email", "emails", "e-mail", "reply", "respond"]),
            5,
        ),
        (
            KeywordSet::compile("fifteen_minutes", &["call", "phone", "ring", "chase", "follow up"]),
            15,
        ),
        (
            KeywordSet::compile("thirty_minutes", &["review", "mark", "marking", "check"]),
            30,
        ),
        (
            KeywordSet::compile("hour", &["draft", "strategy", "plan", "write", "prepare"]),
            60,
        ),
    ]
});

/// Minutes implied by the first time cue found in `text`.
pub fn time_cue_minutes(text: &str) -> Option<u32> {
    TIME_CUES
        .iter()
        .find(|(set, _)| set.matches(text))
        .map(|(_, minutes)| *minutes)
}
