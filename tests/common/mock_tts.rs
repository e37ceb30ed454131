//! Mock TTS Engine for Testing
//!
//! Records all synthesized text for verification.

use async_trait::async_trait;
use jarvis_voice::audio::AudioClip;
use jarvis_voice::error::SynthesisFault;
use jarvis_voice::tts::{Rendered, TtsEngine, VoiceParams};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug)]
pub struct MockTts {
    spoken: Mutex<Vec<String>>,
    /// Time spent rendering before audio is returned
    synth_delay: Duration,
    /// Length of the rendered audio
    audio_len: Duration,
    /// Play the audio itself instead of returning a clip
    self_playing: bool,
    pub should_fail: AtomicBool,
}

impl MockTts {
    /// Engine that returns a clip of the given length
    pub fn audio(audio_len: Duration) -> Self {
        Self {
            spoken: Mutex::new(Vec::new()),
            synth_delay: Duration::ZERO,
            audio_len,
            self_playing: false,
            should_fail: AtomicBool::new(false),
        }
    }

    /// Engine that speaks for the given time on its own
    pub fn self_playing(audio_len: Duration) -> Self {
        Self {
            self_playing: true,
            ..Self::audio(audio_len)
        }
    }

    pub fn with_synth_delay(mut self, delay: Duration) -> Self {
        self.synth_delay = delay;
        self
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.spoken.lock().unwrap().len()
    }
}

#[async_trait]
impl TtsEngine for MockTts {
    fn name(&self) -> &str {
        "mock"
    }

    fn self_playing(&self) -> bool {
        self.self_playing
    }

    async fn synthesize(&self, text: &str, _params: &VoiceParams) -> Result<Rendered, SynthesisFault> {
        self.spoken.lock().unwrap().push(text.to_string());
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(SynthesisFault::Unavailable("mock failure".to_string()));
        }

        tokio::time::sleep(self.synth_delay).await;
        if self.self_playing {
            tokio::time::sleep(self.audio_len).await;
            return Ok(Rendered::Spoken);
        }

        let samples = (self.audio_len.as_millis() as usize) * 16;
        Ok(Rendered::Audio(AudioClip::new(vec![0; samples], 16000)))
    }
}
