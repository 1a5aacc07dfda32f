//! Continuation-command classification
//!
//! Decides whether a transcribed utterance at a pause point means
//! "go on" or is a question for the assistant. Kept behind a strategy
//! trait so the literal-phrase heuristic can be swapped for an intent
//! classifier without touching the state machine.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// What an utterance at a pause point means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceIntent {
    /// Advance to the next section
    Continue,
    /// Dispatch to the Q&A endpoint
    Question,
    /// Nothing usable (empty or whitespace); treated like silence
    Empty,
}

/// Strategy for classifying pause-point utterances
///
/// Misclassification is asymmetric: a continuation phrase read as a
/// question costs one extra Q&A round, while a question read as a
/// continuation silently skips it. Implementations should therefore stay
/// conservative about matching Continue.
pub trait ContinuationClassifier: Send + Sync {
    fn classify(&self, utterance: &str) -> UtteranceIntent;
}

/// Exact continuation phrases, matched after normalization
static CONTINUATION_PHRASES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["no", "continue", "next", "no questions", "nope", "go on"]
        .into_iter()
        .collect()
});

/// Literal phrase matcher: short, exact, deliberately not fuzzy
///
/// Normalization is lowercase, trim, and trailing-punctuation strip.
/// The one substring rule is "continue", so "please continue" advances.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralPhraseClassifier;

impl ContinuationClassifier for LiteralPhraseClassifier {
    fn classify(&self, utterance: &str) -> UtteranceIntent {
        let normalized = utterance
            .trim()
            .trim_end_matches(['.', '!', '?', ','])
            .trim()
            .to_lowercase();

        if normalized.is_empty() {
            return UtteranceIntent::Empty;
        }
        if CONTINUATION_PHRASES.contains(normalized.as_str())
            || normalized.contains("continue")
        {
            return UtteranceIntent::Continue;
        }
        UtteranceIntent::Question
    }
}
