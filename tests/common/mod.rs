#![allow(dead_code)]

pub mod mock_asr;
pub mod mock_audio;
pub mod mock_tts;

use jarvis_voice::asr::{AsrEngine, SttPreference, SttProvider};
use jarvis_voice::tts::pipeline::SynthesisEngines;
use jarvis_voice::{EnginePorts, EngineSnapshot, MemoryConfigStore, Timings, VoiceConfig, VoiceEngine, VoiceState};
use mock_asr::MockAsr;
use mock_audio::{MockMicrophone, MockOutput};
use mock_tts::MockTts;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Poll `condition` in 10ms steps of (paused) time
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..3000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub struct HarnessBuilder {
    config: VoiceConfig,
    timings: Timings,
    grant_microphone: bool,
    local_healthy: bool,
    with_streaming: bool,
    tts: MockTts,
}

impl HarnessBuilder {
    pub fn stt(mut self, preference: SttPreference) -> Self {
        self.config.stt_provider = preference;
        self
    }

    pub fn activation_phrase(mut self, phrase: &str) -> Self {
        self.config.activation_phrase = phrase.to_string();
        self
    }

    pub fn deny_microphone(mut self) -> Self {
        self.grant_microphone = false;
        self
    }

    pub fn local_healthy(mut self, healthy: bool) -> Self {
        self.local_healthy = healthy;
        self
    }

    pub fn without_streaming(mut self) -> Self {
        self.with_streaming = false;
        self
    }

    pub fn tts(mut self, tts: MockTts) -> Self {
        self.tts = tts;
        self
    }

    pub fn timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn spawn(self) -> Harness {
        let mic = MockMicrophone::new(self.grant_microphone);
        let streaming = MockAsr::new(SttProvider::Streaming, true);
        let local = MockAsr::new(SttProvider::Local, self.local_healthy);
        let tts = Arc::new(self.tts);
        let output = MockOutput::new();
        let store = Arc::new(MemoryConfigStore::new(self.config.clone()));

        let ports = EnginePorts {
            microphone: mic.clone(),
            streaming: self.with_streaming
                .then(|| streaming.clone() as Arc<dyn AsrEngine>),
            local: Some(local.clone()),
            synthesis: SynthesisEngines {
                system: tts.clone(),
                piper: None,
                cloud: None,
            },
            output: output.clone(),
            config_store: store.clone(),
        };
        let engine = VoiceEngine::spawn(self.config, self.timings, ports);

        let commands = Arc::new(Mutex::new(Vec::new()));
        let sink = commands.clone();
        engine
            .set_command_callback(move |command| sink.lock().unwrap().push(command))
            .expect("engine running");

        Harness {
            engine,
            mic,
            streaming,
            local,
            tts,
            output,
            store,
            commands,
        }
    }
}

/// An engine wired to mocks
pub struct Harness {
    pub engine: VoiceEngine,
    pub mic: Arc<MockMicrophone>,
    pub streaming: Arc<MockAsr>,
    pub local: Arc<MockAsr>,
    pub tts: Arc<MockTts>,
    pub output: Arc<MockOutput>,
    pub store: Arc<MemoryConfigStore>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            config: VoiceConfig::default(),
            timings: Timings::default(),
            grant_microphone: true,
            local_healthy: true,
            with_streaming: true,
            tts: MockTts::audio(Duration::from_millis(200)),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn state(&self) -> VoiceState {
        self.engine.state()
    }

    pub async fn wait_for_state(&self, state: VoiceState) -> bool {
        wait_until(|| self.engine.state() == state).await
    }

    /// Power on and wait for the first recognition session
    pub async fn power_on(&self) {
        self.engine.set_power(true).expect("engine running");
        assert!(self.wait_for_state(VoiceState::Idle).await, "engine did not reach IDLE");
        let started = wait_until(|| self.local.is_listening() || self.streaming.is_listening()).await;
        assert!(started, "no recognition session started");
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        self.engine.snapshot().await.expect("engine running")
    }
}
