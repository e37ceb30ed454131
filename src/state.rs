//! Voice session state
//!
//! `VoiceState::on` is the whole transition table. Every `(state, event)`
//! pair yields a state; pairs not listed leave the state unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoiceState {
    /// Powered off
    Muted,
    /// Listening only for the activation phrase
    Idle,
    /// Capturing a command
    Listening,
    /// Command dispatched
    Processing,
    /// Synthesizing or playing a reply
    Speaking,
    /// Terminal fault; needs a manual power toggle
    Error,
    /// Reply cut off; transient
    Interrupted,
}

impl VoiceState {
    pub const ALL: [VoiceState; 7] = [
        VoiceState::Muted,
        VoiceState::Idle,
        VoiceState::Listening,
        VoiceState::Processing,
        VoiceState::Speaking,
        VoiceState::Error,
        VoiceState::Interrupted,
    ];

    /// Powered and not faulted
    pub fn is_active(self) -> bool {
        !matches!(self, VoiceState::Muted | VoiceState::Error)
    }

    pub fn on(self, event: SessionEvent) -> VoiceState {
        use SessionEvent as E;
        use VoiceState as S;

        match (self, event) {
            (S::Muted | S::Error, E::PowerOn) => S::Idle,
            (_, E::PowerOff) => S::Muted,
            (S::Muted, _) => S::Muted,

            (_, E::PermissionDenied) => S::Error,
            (_, E::TerminalFault) => S::Error,
            (S::Error, _) => S::Error,

            (S::Idle | S::Interrupted | S::Listening, E::ActivationPhrase) => S::Listening,

            (S::Idle | S::Listening | S::Interrupted, E::CommandAccepted) => S::Processing,

            (
                S::Idle | S::Listening | S::Processing | S::Interrupted | S::Speaking,
                E::SpeakStarted,
            ) => S::Speaking,
            (S::Speaking, E::SynthesisComplete) => S::Idle,

            (S::Speaking, E::Interrupt) => S::Interrupted,
            (S::Idle | S::Listening | S::Processing | S::Interrupted, E::Interrupt) => {
                S::Listening
            }
            (S::Interrupted, E::BargeIn) => S::Listening,

            (S::Listening, E::ListeningExpired) => S::Idle,
            (S::Processing, E::ProcessingExpired) => S::Idle,

            (state, _) => state,
        }
    }
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoiceState::Muted => "MUTED",
            VoiceState::Idle => "IDLE",
            VoiceState::Listening => "LISTENING",
            VoiceState::Processing => "PROCESSING",
            VoiceState::Speaking => "SPEAKING",
            VoiceState::Error => "ERROR",
            VoiceState::Interrupted => "INTERRUPTED",
        };
        f.write_str(name)
    }
}

/// Inputs to the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    PowerOn,
    PowerOff,
    PermissionDenied,
    TerminalFault,
    ActivationPhrase,
    CommandAccepted,
    SpeakStarted,
    SynthesisComplete,
    Interrupt,
    BargeIn,
    ListeningExpired,
    ProcessingExpired,
}

impl SessionEvent {
    pub const ALL: [SessionEvent; 12] = [
        SessionEvent::PowerOn,
        SessionEvent::PowerOff,
        SessionEvent::PermissionDenied,
        SessionEvent::TerminalFault,
        SessionEvent::ActivationPhrase,
        SessionEvent::CommandAccepted,
        SessionEvent::SpeakStarted,
        SessionEvent::SynthesisComplete,
        SessionEvent::Interrupt,
        SessionEvent::BargeIn,
        SessionEvent::ListeningExpired,
        SessionEvent::ProcessingExpired,
    ];
}

/// Retry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub error_count: u32,
    pub network_error_count: u32,
    pub consecutive_short_sessions: u32,
}

/// The authoritative session, owned by the engine actor
#[derive(Debug)]
pub struct VoiceSession {
    pub state: VoiceState,
    pub counters: SessionCounters,
    pub session_start: Option<Instant>,
    pub last_manual_activation: Option<Instant>,
    pub wake_word_detected_at: Option<Instant>,
    pub feedback_suppress_until: Option<Instant>,
    /// Start of the current recognition run
    pub recognition_started_at: Option<Instant>,
    /// Whether the current recognition run produced any transcript
    pub speech_captured: bool,
    /// Whether the most recent fault was network-class
    pub last_fault_network: bool,
    started_wall: Option<DateTime<Utc>>,
}

impl Default for VoiceSession {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceSession {
    pub fn new() -> Self {
        Self {
            state: VoiceState::Muted,
            counters: SessionCounters::default(),
            session_start: None,
            last_manual_activation: None,
            wake_word_detected_at: None,
            feedback_suppress_until: None,
            recognition_started_at: None,
            speech_captured: false,
            last_fault_network: false,
            started_wall: None,
        }
    }

    /// Apply an event; returns the previous state when it changed
    pub fn apply(&mut self, event: SessionEvent) -> Option<VoiceState> {
        let next = self.state.on(event);
        if next == self.state {
            return None;
        }
        let previous = self.state;
        self.state = next;
        Some(previous)
    }

    /// Clear counters and timestamps for a fresh power cycle
    pub fn reset(&mut self, now: Instant) {
        self.counters = SessionCounters::default();
        self.session_start = Some(now);
        self.started_wall = Some(Utc::now());
        self.wake_word_detected_at = None;
        self.feedback_suppress_until = None;
        self.recognition_started_at = None;
        self.speech_captured = false;
        self.last_fault_network = false;
    }

    pub fn note_success(&mut self) {
        self.counters.error_count = 0;
        self.counters.network_error_count = 0;
        self.last_fault_network = false;
    }

    pub fn in_grace_window(&self, now: Instant, window: Duration) -> bool {
        self.wake_word_detected_at
            .is_some_and(|at| now.duration_since(at) < window)
    }

    pub fn grace_age(&self, now: Instant) -> Option<Duration> {
        self.wake_word_detected_at.map(|at| now.duration_since(at))
    }

    pub fn feedback_suppressed(&self, now: Instant) -> bool {
        self.feedback_suppress_until.is_some_and(|until| now < until)
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            counters: self.counters,
            started_at: self.started_wall,
            uptime_secs: self.session_start.map(|s| now.duration_since(s).as_secs()),
            grace_window_age_ms: self
                .grace_age(now)
                .map(|d| d.as_millis() as u64),
            feedback_suppressed: self.feedback_suppressed(now),
        }
    }
}

/// Serializable view of the session for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: VoiceState,
    pub counters: SessionCounters,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<u64>,
    pub grace_window_age_ms: Option<u64>,
    pub feedback_suppressed: bool,
}
