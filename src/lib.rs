//! Jarvis Voice Library
//!
//! Real-time voice interaction engine: activation phrase detection,
//! transcription with automatic failover, chained speech synthesis and
//! barge-in, all driven from a single session state machine.

pub mod asr;
pub mod audio;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod state;
pub mod tts;
pub mod utils;
pub mod vad;
pub mod wake_word;

pub use config::{ConfigStore, JsonConfigStore, MemoryConfigStore, Timings, VoiceConfig};
pub use engine::{EnginePorts, EngineSnapshot, TranscriptEvent, VoiceEngine};
pub use error::{VoiceError, VoiceResult};
pub use state::VoiceState;
