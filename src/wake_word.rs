//! Activation phrase matching
//!
//! Recognizers regularly mis-hear short activation words, so a transcript
//! matches when it contains the phrase, a known mis-transcription of it, or
//! a token within a small edit distance of it.

use crate::utils::{collapse_whitespace, edit_distance, normalize_text};
use tracing::debug;

/// Mis-transcriptions observed in the wild, keyed by canonical phrase
const KNOWN_VARIANTS: &[(&str, &[&str])] = &[
    (
        "jarvis",
        &["jar vis", "jarv is", "jarvas", "jervis", "javis", "jarviss", "jarvus"],
    ),
    ("computer", &["compute her", "come puter", "commuter"]),
    ("friday", &["fri day", "fryday"]),
];

/// Filler words dropped from the front of a command once the phrase is removed
const LEADING_FILLERS: &[&str] = &["hey", "hi", "ok", "okay", "yo", "oh", "um", "uh"];

/// Byte range of the activation phrase inside a normalized transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeMatch {
    pub normalized: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct WakeWordMatcher {
    phrase: String,
    variants: Vec<String>,
    max_distance: usize,
    min_token_len: usize,
    max_token_len: usize,
}

impl WakeWordMatcher {
    pub fn new(phrase: &str) -> Self {
        let phrase = normalize_text(phrase);
        let variants = KNOWN_VARIANTS
            .iter()
            .find(|(canonical, _)| *canonical == phrase)
            .map(|(_, v)| v.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default();

        // One edit per three characters; a 6-letter phrase tolerates two.
        let len = phrase.chars().count();
        let max_distance = (len / 3).max(1);

        debug!(%phrase, max_distance, "wake word matcher initialized");

        Self {
            phrase,
            variants,
            max_distance,
            min_token_len: len.saturating_sub(2).max(1),
            max_token_len: len + 2,
        }
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn max_distance(&self) -> usize {
        self.max_distance
    }

    pub fn matches(&self, transcript: &str) -> bool {
        self.find(transcript).is_some()
    }

    /// Locate the activation phrase in a transcript
    pub fn find(&self, transcript: &str) -> Option<WakeMatch> {
        let normalized = normalize_text(transcript);
        if normalized.is_empty() || self.phrase.is_empty() {
            return None;
        }

        if let Some(start) = normalized.find(&self.phrase) {
            let end = start + self.phrase.len();
            return Some(WakeMatch {
                normalized,
                start,
                end,
            });
        }

        for variant in &self.variants {
            if let Some(start) = normalized.find(variant.as_str()) {
                let end = start + variant.len();
                return Some(WakeMatch {
                    normalized,
                    start,
                    end,
                });
            }
        }

        let (start, end) = self.fuzzy_window(&normalized)?;
        debug!(
            heard = &normalized[start..end],
            phrase = %self.phrase,
            "fuzzy activation phrase match"
        );
        Some(WakeMatch {
            normalized,
            start,
            end,
        })
    }

    /// Command text with the activation phrase and leading fillers removed
    pub fn strip(&self, transcript: &str) -> String {
        match self.find(transcript) {
            Some(m) => {
                let before = &m.normalized[..m.start];
                let after = &m.normalized[m.end..];
                strip_leading_fillers(&collapse_whitespace(&format!("{} {}", before, after)))
            }
            None => normalize_text(transcript),
        }
    }

    /// Compare windows of as many tokens as the phrase has words
    fn fuzzy_window(&self, normalized: &str) -> Option<(usize, usize)> {
        let words = self.phrase.split(' ').count();

        let mut offsets = Vec::new();
        let mut pos = 0;
        for token in normalized.split(' ') {
            offsets.push((pos, pos + token.len()));
            pos += token.len() + 1;
        }
        if offsets.len() < words {
            return None;
        }

        offsets.windows(words).find_map(|window| {
            let start = window[0].0;
            let end = window[words - 1].1;
            let candidate = &normalized[start..end];
            let len = candidate.chars().count();
            if len < self.min_token_len || len > self.max_token_len {
                return None;
            }
            (edit_distance(candidate, &self.phrase) <= self.max_distance).then_some((start, end))
        })
    }
}

/// Contract form: does `transcript` contain `phrase`?
pub fn matches(transcript: &str, phrase: &str) -> bool {
    WakeWordMatcher::new(phrase).matches(transcript)
}

fn strip_leading_fillers(text: &str) -> String {
    let mut rest = text;
    loop {
        let next = LEADING_FILLERS.iter().find_map(|filler| {
            if rest == *filler {
                Some("")
            } else {
                rest.strip_prefix(filler).and_then(|r| r.strip_prefix(' '))
            }
        });
        match next {
            Some(r) => rest = r,
            None => return rest.to_string(),
        }
    }
}
