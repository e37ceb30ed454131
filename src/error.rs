//! Jarvis Voice Error Types
//!
//! Faults are split by severity: recognition and synthesis faults are
//! values the engine pattern-matches on, `VoiceError` is what crosses API
//! boundaries.

use thiserror::Error;

/// Severity class of a recognition fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Absorbed; the session continues
    Transient,
    /// Counted; drives backoff, provider switch and finally `ERROR`
    Transport,
    /// Terminal until a manual power toggle
    Permission,
}

/// Fault reported by a transcription provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionFault {
    #[error("no speech detected")]
    NoSpeech,

    #[error("recognition aborted")]
    Aborted,

    #[error("audio capture failed: {0}")]
    AudioCapture(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("recognizer unavailable: {0}")]
    Unavailable(String),

    #[error("microphone access not allowed")]
    NotAllowed,
}

impl RecognitionFault {
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::NoSpeech | Self::Aborted | Self::AudioCapture(_) => FaultKind::Transient,
            Self::Network(_) | Self::Unavailable(_) => FaultKind::Transport,
            Self::NotAllowed => FaultKind::Permission,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Fault reported by a synthesis provider. Never terminal: the pipeline
/// moves on to the next provider in the chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisFault {
    #[error("rate limited")]
    RateLimited,

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("synthesis failed: {0}")]
    Failed(String),

    #[error("no audio handle available")]
    NoAudioHandle,
}

/// Central error type for the voice engine
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Recognition(#[from] RecognitionFault),

    #[error(transparent)]
    Synthesis(#[from] SynthesisFault),

    #[error("audio output error: {0}")]
    Audio(String),

    #[error("voice engine has stopped")]
    EngineStopped,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Wav(#[from] hound::Error),
}

/// Result type alias for voice engine operations
pub type VoiceResult<T> = Result<T, VoiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_classification() {
        assert_eq!(RecognitionFault::NoSpeech.kind(), FaultKind::Transient);
        assert_eq!(RecognitionFault::Aborted.kind(), FaultKind::Transient);
        assert_eq!(
            RecognitionFault::AudioCapture("busy".into()).kind(),
            FaultKind::Transient
        );
        assert_eq!(
            RecognitionFault::Network("reset".into()).kind(),
            FaultKind::Transport
        );
        assert_eq!(RecognitionFault::NotAllowed.kind(), FaultKind::Permission);
        assert!(RecognitionFault::Network("x".into()).is_network());
        assert!(!RecognitionFault::Unavailable("x".into()).is_network());
    }
}
