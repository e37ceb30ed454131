//! Audio types and output ports
//!
//! Playback goes through `AudioContext` handles created by an
//! `OutputBackend` and lent out by the `AudioResourcePool`.

pub mod capture;
#[cfg(feature = "native-audio")]
pub mod engine;
pub mod pool;
pub mod process;

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use capture::{ArecordMicrophone, Microphone};
pub use pool::{AudioLease, AudioResourcePool, PoolSettings, PoolStats};
pub use process::ProcessOutput;

/// Capture format shared by every recognizer
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Frames delivered by the microphone (100 ms at 16 kHz)
pub const CAPTURE_FRAME_SAMPLES: usize = 1600;

/// Mono 16-bit PCM
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioClip {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Decode little-endian s16 PCM bytes
    pub fn from_pcm_le(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Self::new(samples, sample_rate)
    }

    pub fn from_wav_bytes(bytes: &[u8]) -> VoiceResult<Self> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        let samples = match spec.sample_format {
            hound::SampleFormat::Int if spec.bits_per_sample == 16 => {
                reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?
            }
            hound::SampleFormat::Int => {
                let shift = spec.bits_per_sample.saturating_sub(16);
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| (v >> shift) as i16))
                    .collect::<Result<Vec<_>, _>>()?
            }
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })
    }

    pub fn to_wav_bytes(&self) -> VoiceResult<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut buffer, spec)?;
            for sample in &self.samples {
                writer.write_sample(*sample)?;
            }
            writer.finalize()?;
        }
        Ok(buffer.into_inner())
    }

    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() as u64 / self.channels.max(1) as u64;
        Duration::from_millis(frames * 1000 / self.sample_rate.max(1) as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One reusable audio output context
#[async_trait]
pub trait AudioContext: Send + Sync + std::fmt::Debug {
    /// Play a clip and wait until it finishes or is stopped
    async fn play(&self, clip: &AudioClip) -> VoiceResult<()>;

    /// Cut off the current clip
    fn stop(&self);

    /// Park the context between uses
    fn suspend(&self);

    fn resume(&self);

    /// Release the underlying device; the context is unusable afterwards
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Factory for audio output contexts
pub trait OutputBackend: Send + Sync {
    fn open(&self) -> VoiceResult<Arc<dyn AudioContext>>;

    fn name(&self) -> &str;
}

/// Shared, lock-free energy snapshot written by capture and read by the VAD
#[derive(Debug, Clone, Default)]
pub struct LevelMeter {
    bits: Arc<AtomicU32>,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, energy: f32) {
        self.bits.store(energy.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// RMS energy normalized to 0.0..=1.0
pub fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: i64 = samples.iter().map(|&s| (s as i64).pow(2)).sum();
    (sum as f32 / samples.len() as f32).sqrt() / i16::MAX as f32
}

/// Convert little-endian byte chunks from a capture stream
pub(crate) fn pcm_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

pub(crate) fn closed_error() -> VoiceError {
    VoiceError::Audio("audio context is closed".to_string())
}
