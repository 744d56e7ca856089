//! Deterministic detection of unusable attempt output.
//!
//! Nothing here calls a model: every rule is plain pattern matching over
//! the text an attempt produced, so the same output always yields the same
//! verdict.

use serde::{Deserialize, Serialize};

/// Outputs shorter than this (after trimming) are unusable.
pub const MIN_OUTPUT_CHARS: usize = 10;

/// Consecutive structured-output parse failures that force escalation.
pub const MALFORMED_THRESHOLD: u32 = 2;

/// Only outputs at least this long are checked for garbling.
const GARBLE_MIN_CHARS: usize = 200;

/// Garbled when there are more than this many characters per recognizable word.
/// Ordinary prose runs at about six.
const GARBLE_MAX_CHARS_PER_WORD: usize = 25;

/// Skip the garble check for text that is mostly non-ASCII letters (CJK and
/// similar scripts do not separate words with spaces).
const NON_ASCII_LETTER_RATIO: f64 = 0.3;

/// Refusals are phrased up front; only this many leading characters are searched.
const REFUSAL_WINDOW_CHARS: usize = 300;

const REFUSAL_PHRASES: &[&str] = &[
    "i can't help with",
    "i cannot help with",
    "i can't assist with",
    "i cannot assist with",
    "i'm unable to",
    "i am unable to",
    "i'm not able to",
    "i am not able to",
    "i won't be able to",
    "i must decline",
    "as an ai language model",
    "i'm sorry, but i can't",
    "i'm sorry, but i cannot",
];

/// What one attempt produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub output: String,
    /// Structured-output parse failures in a row, including this attempt.
    #[serde(default)]
    pub consecutive_parse_failures: u32,
}

impl AttemptOutcome {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            consecutive_parse_failures: 0,
        }
    }

    pub fn with_parse_failures(mut self, failures: u32) -> Self {
        self.consecutive_parse_failures = failures;
        self
    }
}

/// Which rule marked an attempt as unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    TooShort,
    Refusal,
    MalformedOutput,
    Garbled,
}

/// Returns the first rule the outcome trips, if any.
pub fn classify(outcome: &AttemptOutcome) -> Option<EscalationTrigger> {
    let text = outcome.output.trim();

    if text.chars().count() < MIN_OUTPUT_CHARS {
        return Some(EscalationTrigger::TooShort);
    }
    if is_refusal(text) {
        return Some(EscalationTrigger::Refusal);
    }
    if outcome.consecutive_parse_failures >= MALFORMED_THRESHOLD {
        return Some(EscalationTrigger::MalformedOutput);
    }
    if is_garbled(text) {
        return Some(EscalationTrigger::Garbled);
    }
    None
}

/// True when the attempt should be retried at a higher tier.
pub fn needs_escalation(outcome: &AttemptOutcome) -> bool {
    classify(outcome).is_some()
}

fn is_refusal(text: &str) -> bool {
    let head: String = text
        .chars()
        .take(REFUSAL_WINDOW_CHARS)
        .map(|c| if c == '\u{2019}' { '\'' } else { c })
        .collect::<String>()
        .to_lowercase();
    REFUSAL_PHRASES.iter().any(|phrase| head.contains(phrase))
}

fn is_garbled(text: &str) -> bool {
    let total_chars = text.chars().count();
    if total_chars < GARBLE_MIN_CHARS {
        return false;
    }

    let non_ascii_letters = text
        .chars()
        .filter(|c| c.is_alphabetic() && !c.is_ascii())
        .count();
    if non_ascii_letters as f64 / total_chars as f64 > NON_ASCII_LETTER_RATIO {
        return false;
    }

    let recognizable = text.split_whitespace().filter(|t| is_recognizable_word(t)).count();
    recognizable == 0 || total_chars / recognizable > GARBLE_MAX_CHARS_PER_WORD
}

fn is_recognizable_word(token: &str) -> bool {
    let word = token.trim_matches(|c: char| !c.is_alphanumeric());
    let len = word.chars().count();
    if len == 0 || len > 24 {
        return false;
    }
    let lettered = word
        .chars()
        .all(|c| c.is_alphabetic() || c == '\'' || c == '-');
    let has_vowel = word
        .chars()
        .any(|c| matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u' | 'y'));
    lettered && (has_vowel || !word.is_ascii())
}
