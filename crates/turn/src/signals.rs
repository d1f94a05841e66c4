//! Lexical and prosodic cue detection.

use crate::{DetectedSignals, ProsodyHints, TurnConfig};

/// Verbs that usually form a complete request on their own ("stop", "play jazz").
const COMMAND_VERBS: &[&str] = &[
    "stop", "pause", "play", "resume", "cancel", "repeat", "continue", "skip", "next", "go",
    "open", "close", "call", "show", "tell", "help", "start", "quit", "mute", "unmute",
];

/// Utterances that are complete when spoken alone.
const ACKNOWLEDGEMENTS: &[&str] = &[
    "yes", "no", "yeah", "yep", "nope", "okay", "ok", "sure", "thanks", "thank you", "right",
    "alright", "all right", "got it", "cool", "great", "perfect", "exactly", "correct", "fine",
    "sounds good",
];

const HESITATION_MARKERS: &[&str] = &[
    "um", "umm", "uh", "uhh", "er", "erm", "hmm", "ah", "you know", "i mean",
];

const TRAILING_CONJUNCTIONS: &[&str] = &[
    "and", "but", "or", "so", "because", "cause", "then", "if", "when", "while", "although",
    "though", "since", "unless", "that", "which",
];

/// Phrases that open a request but never finish one.
const INCOMPLETE_OPENERS: &[&str] = &[
    "i want to",
    "i need to",
    "i'd like to",
    "i would like to",
    "i was wondering",
    "can you",
    "could you",
    "would you",
    "let me",
    "what about",
    "how about",
    "tell me about",
    "the thing is",
    "what if",
];

const SUBJECTS: &[&str] = &[
    "i", "you", "we", "they", "he", "she", "it", "this", "that", "my", "our", "there",
];

const VERBS: &[&str] = &[
    "am", "is", "are", "was", "were", "want", "wanted", "need", "needed", "think", "thought",
    "like", "liked", "love", "have", "had", "has", "will", "would", "can", "could", "should",
    "know", "knew", "see", "saw", "got", "get", "went", "go", "did", "do", "does", "made",
    "make", "said", "feel", "felt", "prefer", "agree", "'m", "i'm", "it's", "that's",
];

/// Lowercase words with surrounding punctuation stripped.
pub(crate) fn normalized_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Number of words in an utterance.
pub fn word_count(text: &str) -> usize {
    normalized_words(text).len()
}

fn ends_with_phrase(words: &[String], phrase: &str) -> bool {
    let phrase_words: Vec<&str> = phrase.split(' ').collect();
    if phrase_words.len() > words.len() {
        return false;
    }
    words[words.len() - phrase_words.len()..]
        .iter()
        .zip(&phrase_words)
        .all(|(w, p)| w == p)
}

fn last_char(text: &str) -> Option<char> {
    text.trim_end().chars().last()
}

pub(crate) fn scan(text: &str, prosody: Option<ProsodyHints>, config: &TurnConfig) -> DetectedSignals {
    let mut signals = DetectedSignals::default();
    let words = normalized_words(text);

    // Prosody applies even when the transcript lags behind the audio.
    if let Some(hints) = prosody {
        if hints.rising_intonation {
            signals.continuation.insert("rising_intonation".to_string());
        }
        if hints.mid_word_cutoff {
            signals.continuation.insert("mid_word_cutoff".to_string());
        }
    }

    if words.is_empty() {
        return signals;
    }

    match last_char(text) {
        Some('?') => {
            signals.strong_completion.insert("question_mark".to_string());
        }
        Some('.') | Some('!') => {
            signals.weak_completion.insert("terminal_punctuation".to_string());
        }
        _ => {}
    }

    if words.len() <= config.command_max_words && COMMAND_VERBS.contains(&words[0].as_str()) {
        signals
            .strong_completion
            .insert(format!("command_verb:{}", words[0]));
    }

    let joined = words.join(" ");
    if ACKNOWLEDGEMENTS.contains(&joined.as_str()) {
        signals
            .strong_completion
            .insert(format!("acknowledgement:{joined}"));
    }

    if words.len() >= 3
        && SUBJECTS.contains(&words[0].as_str())
        && VERBS.contains(&words[1].as_str())
    {
        signals
            .weak_completion
            .insert("subject_verb_object".to_string());
    }

    if let Some(marker) = HESITATION_MARKERS
        .iter()
        .find(|m| ends_with_phrase(&words, m))
    {
        signals.continuation.insert(format!("hesitation:{marker}"));
    }

    if let Some(conj) = TRAILING_CONJUNCTIONS
        .iter()
        .find(|c| ends_with_phrase(&words, c))
    {
        signals.continuation.insert(format!("conjunction:{conj}"));
    }

    if let Some(opener) = INCOMPLETE_OPENERS
        .iter()
        .find(|o| ends_with_phrase(&words, o))
    {
        signals
            .continuation
            .insert(format!("incomplete_opener:{opener}"));
    }

    signals
}
