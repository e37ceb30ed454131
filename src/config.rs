use crate::asr::orchestrator::{FailoverPolicy, RestartPolicy};
use crate::asr::SttPreference;
use crate::audio::pool::PoolSettings;
use crate::error::VoiceResult;
use crate::tts::VoiceMode;
use crate::vad::VadSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Persisted engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    // Speech
    pub activation_phrase: String,
    pub synthesis_voice: String,
    pub voice_mode: VoiceMode,
    pub stt_provider: SttPreference,
    pub rate: f32,
    pub pitch: f32,

    // Services
    pub services: ServiceConfig,
}

/// Endpoints of the locally hosted and cloud speech services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub whisper_url: String,
    pub whisper_language: String,
    pub piper_url: String,
    pub piper_launch_command: Vec<String>,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_voice: String,
    pub gemini_requests_per_minute: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            activation_phrase: "jarvis".to_string(),
            synthesis_voice: "en-gb".to_string(),
            voice_mode: VoiceMode::System,
            stt_provider: SttPreference::Auto,
            rate: 1.0,
            pitch: 1.0,
            services: ServiceConfig::default(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            whisper_url: "http://localhost:5001".to_string(),
            whisper_language: "en".to_string(),
            piper_url: "http://localhost:5000".to_string(),
            piper_launch_command: vec![
                "python3".to_string(),
                dirs::data_dir()
                    .unwrap_or_default()
                    .join("jarvis-voice/piper/piper_server.py")
                    .to_string_lossy()
                    .to_string(),
            ],
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.5-flash-preview-tts".to_string(),
            gemini_voice: "Charon".to_string(),
            gemini_requests_per_minute: 10,
        }
    }
}

impl VoiceConfig {
    /// Load config from the default path, or create default
    pub fn load() -> VoiceResult<Self> {
        Self::load_from(&config_path())
    }

    /// Load config from a file; a corrupt file is moved aside and defaults are used
    pub fn load_from(path: &Path) -> VoiceResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match serde_json::from_str::<Self>(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("⚠️ Config file corrupted or invalid, using defaults: {}", e);
                    let backup_path = path.with_extension("json.corrupt");
                    let _ = std::fs::rename(path, &backup_path);
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        if config.services.gemini_api_key.is_empty() {
            if let Ok(key) = std::env::var("GEMINI_API_KEY") {
                config.services.gemini_api_key = key;
            }
        }

        Ok(config.sanitized())
    }

    /// Save config to the default path
    pub fn save(&self) -> VoiceResult<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> VoiceResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Clamp prosody values and normalize the activation phrase
    pub fn sanitized(mut self) -> Self {
        self.rate = if self.rate.is_finite() {
            self.rate.clamp(0.1, 4.0)
        } else {
            1.0
        };
        self.pitch = if self.pitch.is_finite() {
            self.pitch.clamp(0.0, 2.0)
        } else {
            1.0
        };
        self.activation_phrase = self.activation_phrase.trim().to_lowercase();
        if self.activation_phrase.is_empty() {
            self.activation_phrase = Self::default().activation_phrase;
        }
        self
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jarvis-voice")
        .join("config.json")
}

/// Where the engine reads its configuration at startup and writes it on change
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> VoiceResult<VoiceConfig>;
    fn save(&self, config: &VoiceConfig) -> VoiceResult<()>;
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for JsonConfigStore {
    fn default() -> Self {
        Self::new(config_path())
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self) -> VoiceResult<VoiceConfig> {
        VoiceConfig::load_from(&self.path)
    }

    fn save(&self, config: &VoiceConfig) -> VoiceResult<()> {
        config.save_to(&self.path)
    }
}

/// In-memory store, used when persistence is disabled
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    config: Mutex<Option<VoiceConfig>>,
}

impl MemoryConfigStore {
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            config: Mutex::new(Some(config)),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> VoiceResult<VoiceConfig> {
        let guard = self.config.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone().unwrap_or_default())
    }

    fn save(&self, config: &VoiceConfig) -> VoiceResult<()> {
        let mut guard = self.config.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(config.clone());
        Ok(())
    }
}

/// Runtime tuning. Not persisted.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Ceiling on the microphone permission request
    pub permission_timeout: Duration,
    /// Ceiling on any provider availability probe
    pub probe_timeout: Duration,
    /// Window after the activation phrase in which a command needs no phrase
    pub grace_window: Duration,
    /// Age of the grace window after which `LISTENING` falls back to `IDLE`
    pub listening_timeout: Duration,
    /// `PROCESSING` falls back to `IDLE` if no reply starts in time
    pub processing_timeout: Duration,
    /// Deaf period around the start and end of synthesis
    pub feedback_window: Duration,
    /// Identical replies inside this window are spoken once
    pub reply_dedup_window: Duration,
    /// Exact-text command dedup window
    pub command_dedup_window: Duration,
    /// Normalized-hash command dedup window
    pub command_hash_window: Duration,
    pub max_chunk_chars: usize,
    pub vad: VadSettings,
    pub pool: PoolSettings,
    pub restart: RestartPolicy,
    pub failover: FailoverPolicy,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            permission_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
            grace_window: Duration::from_secs(10),
            listening_timeout: Duration::from_secs(15),
            processing_timeout: Duration::from_secs(10),
            feedback_window: Duration::from_millis(500),
            reply_dedup_window: Duration::from_secs(3),
            command_dedup_window: Duration::from_secs(2),
            command_hash_window: Duration::from_secs(5),
            max_chunk_chars: 150,
            vad: VadSettings::default(),
            pool: PoolSettings::default(),
            restart: RestartPolicy::default(),
            failover: FailoverPolicy::default(),
        }
    }
}
