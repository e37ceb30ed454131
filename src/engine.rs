//! Voice Interaction Engine
//!
//! One actor task owns the `VoiceSession` and every collaborator. Commands
//! from `VoiceEngine` handles, recognizer events, VAD signals, timers and
//! playback completion all arrive as messages, so session state is only
//! ever touched from one place and in arrival order.

use crate::asr::orchestrator::EventSink;
use crate::asr::{
    AsrEngine, FaultOutcome, RecognizerEvent, SttPreference, SttProvider, TranscriptionOrchestrator,
};
use crate::audio::{AudioResourcePool, Microphone, OutputBackend, PoolStats};
use crate::config::{ConfigStore, Timings, VoiceConfig};
use crate::dedup::DuplicateCommandFilter;
use crate::error::{FaultKind, RecognitionFault, VoiceError, VoiceResult};
use crate::state::{SessionEvent, SessionSnapshot, VoiceSession, VoiceState};
use crate::tts::pipeline::SynthesisEngines;
use crate::tts::{SpeakOutcome, SpeechOutputPipeline, VoiceParams};
use crate::utils::normalize_text;
use crate::vad::{VadMonitor, VadSignal};
use crate::wake_word::WakeWordMatcher;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Phrases that cut off a reply. Only honored while no audio is playing.
pub const INTERRUPT_PHRASES: &[&str] = &[
    "stop",
    "cancel",
    "quiet",
    "shut up",
    "enough",
    "never mind",
    "be quiet",
    "stop talking",
    "that's enough",
    "pause",
];

/// Does a short utterance consist of (or contain) an interrupt phrase?
pub fn is_interrupt_phrase(text: &str) -> bool {
    let normalized = normalize_text(text);
    let words: Vec<&str> = normalized.split_whitespace().collect();
    INTERRUPT_PHRASES.iter().any(|phrase| {
        let target: Vec<&str> = phrase.split(' ').collect();
        words.len() <= target.len() + 2 && words.windows(target.len()).any(|w| w == target.as_slice())
    })
}

pub type StateCallback = Arc<dyn Fn(VoiceState) + Send + Sync>;
pub type TranscriptCallback = Arc<dyn Fn(&TranscriptEvent) + Send + Sync>;
pub type CommandCallback = Arc<dyn Fn(String) + Send + Sync>;

/// A transcript as seen by subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    pub provider: Option<SttProvider>,
}

/// Diagnostics view of the engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub session: SessionSnapshot,
    pub provider: Option<SttProvider>,
    pub synthesis_chain: Vec<String>,
    pub pool: PoolStats,
    pub live_handles: usize,
    pub handles_in_use: usize,
}

/// Collaborators injected into the engine
pub struct EnginePorts {
    pub microphone: Arc<dyn Microphone>,
    pub streaming: Option<Arc<dyn AsrEngine>>,
    pub local: Option<Arc<dyn AsrEngine>>,
    pub synthesis: SynthesisEngines,
    pub output: Arc<dyn OutputBackend>,
    pub config_store: Arc<dyn ConfigStore>,
}

enum Command {
    Subscribe(StateCallback),
    SubscribeTranscript(TranscriptCallback),
    SetCommandCallback(CommandCallback),
    ToggleMute,
    SetPower(bool),
    Speak(String),
    Interrupt,
    SwitchProvider(SttPreference, oneshot::Sender<VoiceResult<()>>),
    GetConfig(oneshot::Sender<VoiceConfig>),
    SetConfig(Box<VoiceConfig>, oneshot::Sender<VoiceResult<()>>),
    Snapshot(oneshot::Sender<EngineSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

enum EngineEvent {
    Recognition { generation: u64, event: RecognizerEvent },
    Vad { epoch: u64, signal: VadSignal },
    RestartDue { generation: u64 },
    SpeechFinished { id: u64, outcome: SpeakOutcome },
    ListeningTimeout,
    ProcessingTimeout,
}

/// Clonable handle to the engine actor
#[derive(Clone)]
pub struct VoiceEngine {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<VoiceState>,
}

impl VoiceEngine {
    /// Start the engine actor. The engine starts `MUTED`.
    pub fn spawn(config: VoiceConfig, timings: Timings, ports: EnginePorts) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(VoiceState::Muted);

        let actor = EngineActor::new(config.sanitized(), timings, ports, events_tx, state_tx);
        tokio::spawn(actor.run(commands_rx, events_rx));

        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    fn send(&self, command: Command) -> VoiceResult<()> {
        self.commands.send(command).map_err(|_| VoiceError::EngineStopped)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> VoiceResult<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| VoiceError::EngineStopped)
    }

    pub fn subscribe(&self, callback: impl Fn(VoiceState) + Send + Sync + 'static) -> VoiceResult<()> {
        self.send(Command::Subscribe(Arc::new(callback)))
    }

    pub fn subscribe_to_transcript(
        &self,
        callback: impl Fn(&TranscriptEvent) + Send + Sync + 'static,
    ) -> VoiceResult<()> {
        self.send(Command::SubscribeTranscript(Arc::new(callback)))
    }

    pub fn set_command_callback(&self, callback: impl Fn(String) + Send + Sync + 'static) -> VoiceResult<()> {
        self.send(Command::SetCommandCallback(Arc::new(callback)))
    }

    /// Power on from `MUTED` or `ERROR`, power off otherwise
    pub fn toggle_mute(&self) -> VoiceResult<()> {
        self.send(Command::ToggleMute)
    }

    pub fn set_power(&self, on: bool) -> VoiceResult<()> {
        self.send(Command::SetPower(on))
    }

    pub fn speak(&self, text: impl Into<String>) -> VoiceResult<()> {
        self.send(Command::Speak(text.into()))
    }

    /// Cut off any reply and start capturing a command
    pub fn interrupt(&self) -> VoiceResult<()> {
        self.send(Command::Interrupt)
    }

    pub async fn switch_stt_provider(&self, preference: SttPreference) -> VoiceResult<()> {
        self.request(|tx| Command::SwitchProvider(preference, tx)).await?
    }

    pub fn state(&self) -> VoiceState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<VoiceState> {
        self.state.clone()
    }

    pub async fn config(&self) -> VoiceResult<VoiceConfig> {
        self.request(Command::GetConfig).await
    }

    pub async fn set_config(&self, config: VoiceConfig) -> VoiceResult<()> {
        self.request(|tx| Command::SetConfig(Box::new(config), tx)).await?
    }

    pub async fn snapshot(&self) -> VoiceResult<EngineSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// Power off, close every audio handle and stop the actor
    pub async fn shutdown(&self) -> VoiceResult<()> {
        self.request(Command::Shutdown).await
    }
}

struct EngineActor {
    session: VoiceSession,
    config: VoiceConfig,
    timings: Timings,
    matcher: WakeWordMatcher,
    dedup: DuplicateCommandFilter,
    orchestrator: TranscriptionOrchestrator,
    pipeline: SpeechOutputPipeline,
    synthesis: SynthesisEngines,
    pool: AudioResourcePool,
    microphone: Arc<dyn Microphone>,
    config_store: Arc<dyn ConfigStore>,

    events: mpsc::UnboundedSender<EngineEvent>,
    state_tx: watch::Sender<VoiceState>,
    state_callbacks: Vec<StateCallback>,
    transcript_callbacks: Vec<TranscriptCallback>,
    command_callback: Option<CommandCallback>,

    vad: Option<VadMonitor>,
    vad_epoch: u64,
    speech_id: u64,
    speech_cancel: Option<CancellationToken>,
    restart_timer: Option<JoinHandle<()>>,
    listening_timer: Option<JoinHandle<()>>,
    processing_timer: Option<JoinHandle<()>>,
}

impl EngineActor {
    fn new(
        config: VoiceConfig,
        timings: Timings,
        ports: EnginePorts,
        events: mpsc::UnboundedSender<EngineEvent>,
        state_tx: watch::Sender<VoiceState>,
    ) -> Self {
        let pool = AudioResourcePool::new(ports.output, timings.pool.clone());

        let sink_tx = events.clone();
        let sink: EventSink = Arc::new(move |generation, event| {
            let _ = sink_tx.send(EngineEvent::Recognition { generation, event });
        });
        let orchestrator = TranscriptionOrchestrator::new(
            ports.streaming,
            ports.local,
            sink,
            timings.failover.clone(),
            timings.probe_timeout,
        );

        let pipeline = SpeechOutputPipeline::new(
            ports.synthesis.chain_for(config.voice_mode),
            pool.clone(),
            timings.max_chunk_chars,
            timings.reply_dedup_window,
        );

        info!(
            "🤖 Voice engine ready (phrase: '{}', voice mode: {}, stt: {:?})",
            config.activation_phrase, config.voice_mode, config.stt_provider
        );

        Self {
            session: VoiceSession::new(),
            matcher: WakeWordMatcher::new(&config.activation_phrase),
            dedup: DuplicateCommandFilter::new(timings.command_dedup_window, timings.command_hash_window),
            orchestrator,
            pipeline,
            synthesis: ports.synthesis,
            pool,
            microphone: ports.microphone,
            config_store: ports.config_store,
            config,
            timings,
            events,
            state_tx,
            state_callbacks: Vec::new(),
            transcript_callbacks: Vec::new(),
            command_callback: None,
            vad: None,
            vad_epoch: 0,
            speech_id: 0,
            speech_cancel: None,
            restart_timer: None,
            listening_timer: None,
            processing_timer: None,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.shutdown();
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All engine handles dropped");
                        self.shutdown();
                        return;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event).await,
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Subscribe(callback) => {
                callback(self.session.state);
                self.state_callbacks.push(callback);
            }
            Command::SubscribeTranscript(callback) => self.transcript_callbacks.push(callback),
            Command::SetCommandCallback(callback) => self.command_callback = Some(callback),
            Command::ToggleMute => {
                if self.session.state.is_active() {
                    self.power_off();
                } else {
                    self.power_on().await;
                }
            }
            Command::SetPower(true) => {
                if !self.session.state.is_active() {
                    self.power_on().await;
                }
            }
            Command::SetPower(false) => self.power_off(),
            Command::Speak(text) => self.speak(text),
            Command::Interrupt => self.interrupt(),
            Command::SwitchProvider(preference, reply) => {
                let result = self.switch_provider(preference).await;
                let _ = reply.send(result);
            }
            Command::GetConfig(reply) => {
                let _ = reply.send(self.config.clone());
            }
            Command::SetConfig(config, reply) => {
                let result = self.set_config(*config).await;
                let _ = reply.send(result);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown(_) => {}
        }
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Recognition { generation, event } => {
                if generation != self.orchestrator.generation() {
                    debug!(generation, "Dropping event from a replaced recognition session");
                    return;
                }
                self.on_recognition(generation, event).await;
            }
            EngineEvent::Vad { epoch, signal } => {
                if epoch != self.vad_epoch || self.vad.is_none() {
                    return;
                }
                match signal {
                    VadSignal::SpeechStarted => self.session.speech_captured = true,
                    VadSignal::Finalize(reason) => {
                        debug!(?reason, "Finalizing utterance");
                        self.orchestrator.finalize();
                    }
                }
            }
            EngineEvent::RestartDue { generation } => {
                self.restart_timer = None;
                if generation == self.orchestrator.generation()
                    && self.session.state.is_active()
                    && !self.orchestrator.is_running()
                {
                    self.start_recognition().await;
                }
            }
            EngineEvent::SpeechFinished { id, outcome } => {
                if id != self.speech_id {
                    return;
                }
                self.speech_cancel = None;
                debug!(?outcome, "🗣️ Reply finished");
                if self.session.state == VoiceState::Speaking {
                    self.session.feedback_suppress_until = Some(Instant::now() + self.timings.feedback_window);
                    self.transition(SessionEvent::SynthesisComplete);
                }
            }
            EngineEvent::ListeningTimeout => {
                self.listening_timer = None;
                let expired = self
                    .session
                    .grace_age(Instant::now())
                    .map_or(true, |age| age >= self.timings.listening_timeout);
                if self.session.state == VoiceState::Listening && expired {
                    info!("⌛ No command heard, back to idle");
                    self.session.wake_word_detected_at = None;
                    self.transition(SessionEvent::ListeningExpired);
                }
            }
            EngineEvent::ProcessingTimeout => {
                self.processing_timer = None;
                if self.session.state == VoiceState::Processing {
                    debug!("⌛ No reply to the last command");
                    self.transition(SessionEvent::ProcessingExpired);
                }
            }
        }
    }

    // ---- state ---------------------------------------------------------

    fn transition(&mut self, event: SessionEvent) -> bool {
        let Some(previous) = self.session.apply(event) else {
            return false;
        };
        let next = self.session.state;
        info!("🔄 State: {} → {} ({:?})", previous, next, event);

        if previous == VoiceState::Listening {
            self.stop_vad();
            abort_timer(&mut self.listening_timer);
        }
        if previous == VoiceState::Processing {
            abort_timer(&mut self.processing_timer);
        }

        match next {
            VoiceState::Listening => {
                self.start_vad();
                self.schedule_listening_timeout();
            }
            VoiceState::Processing => self.schedule_processing_timeout(),
            VoiceState::Muted | VoiceState::Error => self.stop_io(),
            _ => {}
        }
        if next == VoiceState::Error {
            error!("❌ Voice engine halted; toggle power to recover");
        }

        self.state_tx.send_replace(next);
        for callback in &self.state_callbacks {
            callback(next);
        }
        true
    }

    /// Stop listening and speaking entirely
    fn stop_io(&mut self) {
        self.cancel_speech();
        self.orchestrator.abort();
        self.microphone.stop();
        self.stop_vad();
        abort_timer(&mut self.restart_timer);
        abort_timer(&mut self.listening_timer);
        abort_timer(&mut self.processing_timer);
        self.session.wake_word_detected_at = None;
        self.session.feedback_suppress_until = None;
    }

    async fn power_on(&mut self) {
        let now = Instant::now();
        self.session.reset(now);
        self.dedup.clear();
        self.orchestrator.note_success();
        self.transition(SessionEvent::PowerOn);
        info!("🎙️ Powering on");

        let access = tokio::time::timeout(self.timings.permission_timeout, self.microphone.request_access()).await;
        match access {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("❌ Microphone access denied: {}", e);
                self.transition(SessionEvent::PermissionDenied);
                return;
            }
            Err(_) => {
                error!("⏱️ Microphone permission request timed out");
                self.transition(SessionEvent::PermissionDenied);
                return;
            }
        }

        if let Err(e) = self.microphone.start() {
            error!("❌ Could not start audio capture: {}", e);
            self.transition(SessionEvent::TerminalFault);
            return;
        }

        match self.orchestrator.select(self.config.stt_provider).await {
            Ok(_) => self.start_recognition().await,
            Err(fault) => {
                error!("❌ No transcription provider: {}", fault);
                self.transition(SessionEvent::TerminalFault);
            }
        }
    }

    fn power_off(&mut self) {
        if self.session.state == VoiceState::Muted {
            return;
        }
        info!("🔇 Powering off");
        self.transition(SessionEvent::PowerOff);
    }

    fn shutdown(&mut self) {
        self.power_off();
        self.stop_io();
        self.pool.teardown();
        info!("👋 Voice engine stopped");
    }

    // ---- recognition ---------------------------------------------------

    async fn start_recognition(&mut self) {
        if !self.session.state.is_active() || self.orchestrator.active().is_none() {
            return;
        }
        self.session.recognition_started_at = Some(Instant::now());
        self.session.speech_captured = false;

        if let Err(fault) = self.orchestrator.start().await {
            warn!("⚠️ Recognition failed to start: {}", fault);
            let generation = self.orchestrator.generation();
            self.on_fault(fault).await;
            if self.orchestrator.generation() == generation {
                self.orchestrator.mark_ended(generation);
            }
            if self.session.state.is_active() && !self.orchestrator.is_running() {
                self.schedule_restart();
            }
        }
    }

    async fn on_recognition(&mut self, generation: u64, event: RecognizerEvent) {
        match event {
            RecognizerEvent::Partial(text) => {
                self.session.speech_captured = true;
                if self.session.state != VoiceState::Speaking {
                    self.emit_transcript(text, false);
                }
            }
            RecognizerEvent::Final(text) => {
                self.session.speech_captured = true;
                self.session.note_success();
                self.orchestrator.note_success();
                self.on_final(text);
            }
            RecognizerEvent::Fault(fault) => self.on_fault(fault).await,
            RecognizerEvent::Ended => {
                self.orchestrator.mark_ended(generation);
                self.on_recognition_end();
            }
        }
    }

    async fn on_fault(&mut self, fault: RecognitionFault) {
        match fault.kind() {
            FaultKind::Transient => debug!("Recognition: {}", fault),
            FaultKind::Permission => {
                error!("❌ {}", fault);
                self.transition(SessionEvent::PermissionDenied);
            }
            FaultKind::Transport => {
                let counters = &mut self.session.counters;
                counters.error_count += 1;
                if fault.is_network() {
                    counters.network_error_count += 1;
                }
                self.session.last_fault_network = fault.is_network();
                warn!(errors = self.session.counters.error_count, "⚠️ Recognition transport fault: {}", fault);

                match self.orchestrator.on_transport_fault().await {
                    FaultOutcome::Retry => {}
                    FaultOutcome::SwitchedToLocal => {
                        info!("🔄 Switched to local transcription");
                        self.session.counters.error_count = 0;
                        self.schedule_restart();
                    }
                    FaultOutcome::Terminal => {
                        self.transition(SessionEvent::TerminalFault);
                    }
                }
            }
        }
    }

    fn on_recognition_end(&mut self) {
        if !self.session.state.is_active() {
            return;
        }
        let now = Instant::now();

        let short = self.session.recognition_started_at.is_some_and(|start| {
            now.duration_since(start) < self.timings.restart.short_session
        }) && !self.session.speech_captured;
        if short {
            self.session.counters.consecutive_short_sessions += 1;
        } else {
            self.session.counters.consecutive_short_sessions = 0;
        }

        if self.session.state == VoiceState::Listening
            && self
                .session
                .grace_age(now)
                .is_some_and(|age| age > self.timings.listening_timeout)
        {
            self.session.wake_word_detected_at = None;
            self.transition(SessionEvent::ListeningExpired);
        }

        self.schedule_restart();
    }

    fn schedule_restart(&mut self) {
        let counters = self.session.counters;
        let delay = self.timings.restart.delay(
            counters.error_count,
            counters.consecutive_short_sessions,
            self.session.last_fault_network,
        );
        let generation = self.orchestrator.generation();
        debug!(
            delay_ms = delay.as_millis() as u64,
            errors = counters.error_count,
            short_sessions = counters.consecutive_short_sessions,
            "Recognition restart scheduled"
        );
        let handle = self.schedule(delay, EngineEvent::RestartDue { generation });
        replace_timer(&mut self.restart_timer, handle);
    }

    // ---- transcripts ---------------------------------------------------

    fn emit_transcript(&self, text: String, is_final: bool) {
        let event = TranscriptEvent {
            text,
            is_final,
            provider: self.orchestrator.active(),
        };
        for callback in &self.transcript_callbacks {
            callback(&event);
        }
    }

    fn on_final(&mut self, text: String) {
        let now = Instant::now();
        let state = self.session.state;

        if state == VoiceState::Speaking || self.session.feedback_suppressed(now) {
            if is_interrupt_phrase(&text) && !self.pipeline.is_audio_active() {
                info!("✋ Barge-in: '{}'", text);
                self.emit_transcript(text, true);
                self.interrupt();
            } else {
                debug!("🔇 Ignoring transcript during playback: '{}'", text);
            }
            return;
        }

        self.emit_transcript(text.clone(), true);

        if self.matcher.matches(&text) {
            let command = self.matcher.strip(&text);
            self.session.wake_word_detected_at = Some(now);
            if command.is_empty() {
                info!("👂 Activation phrase detected");
                if !self.transition(SessionEvent::ActivationPhrase) && state == VoiceState::Listening {
                    self.schedule_listening_timeout();
                }
            } else {
                self.dispatch(command, now);
            }
            return;
        }

        let accepts_command = state == VoiceState::Listening
            || (matches!(state, VoiceState::Idle | VoiceState::Interrupted)
                && self.session.in_grace_window(now, self.timings.grace_window));
        if accepts_command {
            let command = normalize_text(&text);
            self.dispatch(command, now);
        } else {
            debug!("Ignoring transcript without activation phrase: '{}'", text);
        }
    }

    fn dispatch(&mut self, command: String, now: Instant) {
        if command.is_empty() {
            return;
        }
        if !self.dedup.admit(&command, now) {
            debug!("🔁 Duplicate command dropped: '{}'", command);
            return;
        }

        info!("🎯 Command: '{}'", command);
        self.session.wake_word_detected_at = None;
        if !self.transition(SessionEvent::CommandAccepted) && self.session.state == VoiceState::Processing {
            self.schedule_processing_timeout();
        }
        match &self.command_callback {
            Some(callback) => callback(command),
            None => warn!("No command callback set, dropping '{}'", command),
        }
    }

    // ---- speech --------------------------------------------------------

    fn voice_params(&self) -> VoiceParams {
        VoiceParams {
            voice: self.config.synthesis_voice.clone(),
            rate: self.config.rate,
            pitch: self.config.pitch,
        }
    }

    fn speak(&mut self, text: String) {
        if !self.session.state.is_active() {
            debug!("Not speaking while {}", self.session.state);
            return;
        }
        if text.trim().is_empty() {
            return;
        }
        let now = Instant::now();
        if self.pipeline.is_repeat(&text, now) {
            debug!("🔁 Duplicate reply suppressed");
            return;
        }

        self.cancel_speech();
        self.speech_id += 1;
        self.session.feedback_suppress_until = Some(now + self.timings.feedback_window);
        self.transition(SessionEvent::SpeakStarted);

        let token = CancellationToken::new();
        self.speech_cancel = Some(token.clone());
        let pipeline = self.pipeline.clone();
        let params = self.voice_params();
        let events = self.events.clone();
        let id = self.speech_id;
        tokio::spawn(async move {
            let outcome = pipeline.speak(&text, &params, &token).await;
            let _ = events.send(EngineEvent::SpeechFinished { id, outcome });
        });
    }

    fn cancel_speech(&mut self) {
        if let Some(token) = self.speech_cancel.take() {
            token.cancel();
        }
        self.pipeline.halt();
    }

    fn interrupt(&mut self) {
        let state = self.session.state;
        if !state.is_active() {
            return;
        }
        self.cancel_speech();
        self.session.feedback_suppress_until = None;

        let now = Instant::now();
        self.session.last_manual_activation = Some(now);
        self.session.wake_word_detected_at = Some(now);

        if state == VoiceState::Speaking {
            self.transition(SessionEvent::Interrupt);
            self.transition(SessionEvent::BargeIn);
        } else if !self.transition(SessionEvent::Interrupt) && state == VoiceState::Listening {
            self.schedule_listening_timeout();
        }
    }

    // ---- configuration -------------------------------------------------

    async fn switch_provider(&mut self, preference: SttPreference) -> VoiceResult<()> {
        self.config.stt_provider = preference;
        let saved = self.config_store.save(&self.config);

        if self.session.state.is_active() {
            match self.orchestrator.select(preference).await {
                Ok(provider) => {
                    info!("🔄 Switched transcription to {}", provider);
                    self.session.note_success();
                    self.start_recognition().await;
                }
                Err(fault) => {
                    error!("❌ Cannot switch transcription provider: {}", fault);
                    self.transition(SessionEvent::TerminalFault);
                    return Err(fault.into());
                }
            }
        }
        saved
    }

    async fn set_config(&mut self, config: VoiceConfig) -> VoiceResult<()> {
        let config = config.sanitized();
        let previous = std::mem::replace(&mut self.config, config);

        if previous.activation_phrase != self.config.activation_phrase {
            self.matcher = WakeWordMatcher::new(&self.config.activation_phrase);
            info!("👂 Activation phrase is now '{}'", self.config.activation_phrase);
        }
        if previous.voice_mode != self.config.voice_mode {
            self.pipeline
                .set_chain(self.synthesis.chain_for(self.config.voice_mode));
        }

        let provider_changed = previous.stt_provider != self.config.stt_provider;
        if provider_changed {
            self.switch_provider(self.config.stt_provider).await
        } else {
            self.config_store.save(&self.config)
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            session: self.session.snapshot(Instant::now()),
            provider: self.orchestrator.active(),
            synthesis_chain: self.pipeline.chain_names(),
            pool: self.pool.stats(),
            live_handles: self.pool.live_count(),
            handles_in_use: self.pool.in_use_count(),
        }
    }

    // ---- VAD and timers ------------------------------------------------

    fn start_vad(&mut self) {
        self.stop_vad();
        self.vad_epoch += 1;
        let epoch = self.vad_epoch;
        let events = self.events.clone();
        self.vad = Some(VadMonitor::spawn(
            self.microphone.level(),
            self.timings.vad.clone(),
            &self.pool,
            move |signal| {
                let _ = events.send(EngineEvent::Vad { epoch, signal });
            },
        ));
    }

    fn stop_vad(&mut self) {
        if let Some(mut vad) = self.vad.take() {
            vad.stop();
        }
    }

    fn schedule(&self, delay: Duration, event: EngineEvent) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        })
    }

    fn schedule_listening_timeout(&mut self) {
        let handle = self.schedule(self.timings.listening_timeout, EngineEvent::ListeningTimeout);
        replace_timer(&mut self.listening_timer, handle);
    }

    fn schedule_processing_timeout(&mut self) {
        let handle = self.schedule(self.timings.processing_timeout, EngineEvent::ProcessingTimeout);
        replace_timer(&mut self.processing_timer, handle);
    }
}

fn abort_timer(timer: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = timer.take() {
        handle.abort();
    }
}

fn replace_timer(timer: &mut Option<JoinHandle<()>>, handle: JoinHandle<()>) {
    if let Some(previous) = timer.replace(handle) {
        previous.abort();
    }
}
