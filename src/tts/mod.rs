//! TTS (Text-to-Speech) Module
//!
//! Provides a unified interface for multiple synthesis backends and the
//! pipeline that chains them.

use crate::audio::AudioClip;
use crate::error::SynthesisFault;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod cloud;
pub mod pipeline;
pub mod piper;
pub mod system;

pub use cloud::CloudEngine;
pub use pipeline::{SpeakOutcome, SpeechOutputPipeline};
pub use piper::PiperEngine;
pub use system::SystemEngine;

lazy_static! {
    static ref SENTENCE_RE: Regex = Regex::new(r"[^.!?]+(?:[.!?]+|$)").expect("valid regex");
}

/// Which synthesis chain to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceMode {
    /// Platform synthesis only
    #[default]
    System,
    /// Locally hosted server, platform synthesis as fallback
    Piper,
    /// Cloud neural voices, platform synthesis as fallback
    Gemini,
}

impl fmt::Display for VoiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Piper => write!(f, "piper"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

impl std::str::FromStr for VoiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(Self::System),
            "piper" => Ok(Self::Piper),
            "gemini" | "cloud" => Ok(Self::Gemini),
            other => Err(format!("unknown voice mode: {}", other)),
        }
    }
}

/// Voice and prosody for one utterance
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    pub voice: String,
    /// 1.0 is normal speed
    pub rate: f32,
    /// 1.0 is normal pitch
    pub pitch: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice: "en-gb".to_string(),
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

/// Result of a synthesis call
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    /// The engine played the audio itself and it has finished
    Spoken,
    /// Audio that still has to be played through a pooled handle
    Audio(AudioClip),
}

/// Trait for TTS engines
#[async_trait]
pub trait TtsEngine: Send + Sync + std::fmt::Debug {
    /// Get the engine name
    fn name(&self) -> &str;

    /// Engines that drive the speakers themselves return `Rendered::Spoken`
    fn self_playing(&self) -> bool {
        false
    }

    /// Synthesize one chunk. Dropping the future must stop any audio the
    /// engine is playing itself.
    async fn synthesize(&self, text: &str, params: &VoiceParams) -> Result<Rendered, SynthesisFault>;
}

/// Split text into chunks no longer than `max_chars`, breaking at sentence
/// boundaries where possible and at word boundaries otherwise.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in SENTENCE_RE.find_iter(text).map(|m| m.as_str().trim()) {
        if sentence.is_empty() {
            continue;
        }
        for piece in split_long(sentence, max_chars) {
            let joined_len = current.chars().count() + 1 + piece.chars().count();
            if current.is_empty() {
                current = piece;
            } else if joined_len <= max_chars {
                current.push(' ');
                current.push_str(&piece);
            } else {
                chunks.push(std::mem::replace(&mut current, piece));
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Break one sentence at word boundaries; words longer than the limit are cut
fn split_long(sentence: &str, max_chars: usize) -> Vec<String> {
    if sentence.chars().count() <= max_chars {
        return vec![sentence.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            continue;
        }
        if current.is_empty() {
            current.push_str(word);
        } else if current.chars().count() + 1 + word_len <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            pieces.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(split_into_chunks("Hello there.", 150), vec!["Hello there."]);
        assert!(split_into_chunks("   ", 150).is_empty());
    }

    #[test]
    fn test_sentences_are_packed_under_limit() {
        let text = "First sentence here. Second one! Third? And a fourth without a stop";
        let chunks = split_into_chunks(text, 40);
        assert_eq!(
            chunks,
            vec![
                "First sentence here. Second one! Third?",
                "And a fourth without a stop",
            ]
        );
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
    }

    #[test]
    fn test_long_sentence_breaks_at_words() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = split_into_chunks(text, 15);
        assert!(chunks.iter().all(|c| c.chars().count() <= 15));
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_voice_mode_parsing() {
        assert_eq!("Piper".parse::<VoiceMode>(), Ok(VoiceMode::Piper));
        assert_eq!("cloud".parse::<VoiceMode>(), Ok(VoiceMode::Gemini));
        let mode: VoiceMode = serde_json::from_str("\"gemini\"").expect("parse");
        assert_eq!(mode, VoiceMode::Gemini);
    }
}
