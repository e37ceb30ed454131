//! Voice activity detection
//!
//! Energy based endpointing: a frame above the threshold marks speech,
//! a continuous run below it for the silence timeout ends the utterance.
//! Utterances are also cut at a hard ceiling so a speaker who never pauses
//! still gets a timely result.

use crate::audio::{AudioLease, AudioResourcePool, LevelMeter};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct VadSettings {
    /// Normalized RMS energy that counts as speech
    pub threshold: f32,
    /// Silence that ends an utterance
    pub silence_timeout: Duration,
    /// Hard ceiling on a single utterance
    pub max_utterance: Duration,
    /// How often the level meter is sampled
    pub cadence: Duration,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            silence_timeout: Duration::from_millis(1200),
            max_utterance: Duration::from_secs(10),
            cadence: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    Silence,
    MaxDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadSignal {
    SpeechStarted,
    /// The current utterance is over, submit it now
    Finalize(FinalizeReason),
}

/// Turns a stream of energy samples into speech start / finalize signals
#[derive(Debug, Clone)]
pub struct ActivityDetector {
    settings: VadSettings,
    is_speaking: bool,
    speech_started_at: Option<Instant>,
    last_voice_at: Option<Instant>,
}

impl ActivityDetector {
    pub fn new(settings: VadSettings) -> Self {
        Self {
            settings,
            is_speaking: false,
            speech_started_at: None,
            last_voice_at: None,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    pub fn settings(&self) -> &VadSettings {
        &self.settings
    }

    pub fn reset(&mut self) {
        self.is_speaking = false;
        self.speech_started_at = None;
        self.last_voice_at = None;
    }

    /// Feed one energy sample taken at `now`
    pub fn sample(&mut self, energy: f32, now: Instant) -> Option<VadSignal> {
        if energy > self.settings.threshold {
            self.last_voice_at = Some(now);
            if !self.is_speaking {
                self.is_speaking = true;
                self.speech_started_at = Some(now);
                debug!(energy, "🎤 Speech started");
                return Some(VadSignal::SpeechStarted);
            }
        }

        if !self.is_speaking {
            return None;
        }

        let started = self.speech_started_at.unwrap_or(now);
        if now.duration_since(started) >= self.settings.max_utterance {
            return Some(self.finalize(FinalizeReason::MaxDuration));
        }

        let last_voice = self.last_voice_at.unwrap_or(started);
        if now.duration_since(last_voice) >= self.settings.silence_timeout {
            return Some(self.finalize(FinalizeReason::Silence));
        }

        None
    }

    fn finalize(&mut self, reason: FinalizeReason) -> VadSignal {
        let length = self
            .speech_started_at
            .zip(self.last_voice_at)
            .map(|(start, end)| end.duration_since(start))
            .unwrap_or_default();
        debug!(?reason, length_ms = length.as_millis() as u64, "🔇 Utterance finalized");
        self.reset();
        VadSignal::Finalize(reason)
    }
}

/// Background sampler that runs while a command is being captured.
///
/// Holds one pooled audio handle for the analyser. Dropping or stopping
/// the monitor aborts the sampling task and releases the handle at once.
pub struct VadMonitor {
    task: Option<JoinHandle<()>>,
    lease: Option<AudioLease>,
}

impl VadMonitor {
    pub fn spawn<F>(meter: LevelMeter, settings: VadSettings, pool: &AudioResourcePool, on_signal: F) -> Self
    where
        F: Fn(VadSignal) + Send + 'static,
    {
        let lease = pool.acquire();
        if lease.is_none() {
            warn!("⚠️ No audio handle for the activity analyser, sampling without one");
        }

        let cadence = settings.cadence;
        let mut detector = ActivityDetector::new(settings);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let now = ticker.tick().await;
                if let Some(signal) = detector.sample(meter.get(), now) {
                    on_signal(signal);
                }
            }
        });

        info!("👂 Activity detection started");
        Self {
            task: Some(task),
            lease,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("👂 Activity detection stopped");
        }
        self.lease.take();
    }
}

impl Drop for VadMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_finalizes_after_timeout() {
        let mut vad = ActivityDetector::new(VadSettings::default());
        let t0 = Instant::now();

        assert_eq!(vad.sample(0.001, t0), None);
        assert_eq!(vad.sample(0.2, t0 + ms(100)), Some(VadSignal::SpeechStarted));
        assert_eq!(vad.sample(0.2, t0 + ms(200)), None);
        assert_eq!(vad.sample(0.0, t0 + ms(1300)), None);
        assert_eq!(
            vad.sample(0.0, t0 + ms(1400)),
            Some(VadSignal::Finalize(FinalizeReason::Silence))
        );
        assert!(!vad.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_speech_hits_ceiling() {
        let mut vad = ActivityDetector::new(VadSettings::default());
        let t0 = Instant::now();

        assert_eq!(vad.sample(0.5, t0), Some(VadSignal::SpeechStarted));
        let mut signal = None;
        for step in 1..=100 {
            signal = vad.sample(0.5, t0 + ms(step * 100));
            if signal.is_some() {
                break;
            }
        }
        assert_eq!(signal, Some(VadSignal::Finalize(FinalizeReason::MaxDuration)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_dips_do_not_finalize() {
        let mut vad = ActivityDetector::new(VadSettings::default());
        let t0 = Instant::now();
        vad.sample(0.3, t0);
        assert_eq!(vad.sample(0.0, t0 + ms(800)), None);
        assert_eq!(vad.sample(0.3, t0 + ms(900)), None);
        assert_eq!(vad.sample(0.0, t0 + ms(1900)), None);
        assert!(vad.is_speaking());
    }
}
