//! ASR (Automatic Speech Recognition) Module
//!
//! Provides two interchangeable recognizer kinds:
//! - Streaming: continuous recognition with partial results (Vosk)
//! - Local: push-to-finalize transcription server (Whisper over HTTP)
//!
//! Both report through the same `RecognizerEvent` stream, so everything
//! downstream is provider agnostic.

pub mod orchestrator;
#[cfg(feature = "vosk")]
pub mod vosk;
pub mod whisper;

use crate::error::RecognitionFault;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

pub use orchestrator::{FailoverPolicy, FaultOutcome, RestartPolicy, TranscriptionOrchestrator};
#[cfg(feature = "vosk")]
pub use vosk::VoskRecognizer;
pub use whisper::WhisperRecognizer;

/// Which recognizer is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttProvider {
    Streaming,
    Local,
}

impl fmt::Display for SttProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Streaming => write!(f, "streaming"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Configured recognizer preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttPreference {
    /// Always the streaming recognizer
    #[serde(alias = "browser")]
    Streaming,
    /// Always the local engine; unavailable means `ERROR`
    #[serde(alias = "whisper")]
    Local,
    /// Local engine if its probe succeeds, otherwise streaming
    #[default]
    Auto,
}

impl std::str::FromStr for SttPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "streaming" | "browser" => Ok(Self::Streaming),
            "local" | "whisper" => Ok(Self::Local),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown STT provider: {}", other)),
        }
    }
}

/// Events emitted by a recognizer session
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    Partial(String),
    Final(String),
    Fault(RecognitionFault),
    /// The session is over; nothing else follows
    Ended,
}

/// Trait for recognizer engines
#[async_trait]
pub trait AsrEngine: Send + Sync {
    fn provider(&self) -> SttProvider;

    fn name(&self) -> &str;

    /// Availability check. Callers bound it with their own timeout.
    async fn probe(&self) -> bool;

    /// Begin a session that reports into `events` until `Ended`
    async fn start(&self, events: mpsc::UnboundedSender<RecognizerEvent>) -> Result<(), RecognitionFault>;

    /// End the session, flushing any pending final result
    fn stop(&self);

    /// End the session and discard anything pending
    fn abort(&self);

    /// Submit the utterance captured so far. Only meaningful for
    /// push-to-finalize engines.
    fn finalize(&self) {}
}

/// Trim recognizer output, filtering empty results
pub(crate) fn extract_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text() {
        assert_eq!(extract_text(""), None);
        assert_eq!(extract_text("  "), None);
        assert_eq!(extract_text("  hello  "), Some("hello".to_string()));
    }

    #[test]
    fn test_preference_accepts_legacy_names() {
        let pref: SttPreference = serde_json::from_str("\"browser\"").expect("parse");
        assert_eq!(pref, SttPreference::Streaming);
        let pref: SttPreference = serde_json::from_str("\"whisper\"").expect("parse");
        assert_eq!(pref, SttPreference::Local);
        assert_eq!("AUTO".parse::<SttPreference>(), Ok(SttPreference::Auto));
        assert!("carrier-pigeon".parse::<SttPreference>().is_err());
    }
}
