//! Recognizer supervision
//!
//! Chooses between the streaming recognizer and the local engine, tags
//! every event with the session generation it came from, and decides what
//! repeated transport faults lead to.

use super::{AsrEngine, RecognizerEvent, SttPreference, SttProvider};
use crate::error::RecognitionFault;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Restart delay after a recognition session ends unexpectedly
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub base_delay: Duration,
    /// Geometric growth per consecutive error
    pub factor: f64,
    pub max_delay: Duration,
    /// Sessions shorter than this without speech count as short
    pub short_session: Duration,
    /// This many short sessions in a row force the storm cooldown
    pub short_session_limit: u32,
    pub storm_cooldown: Duration,
    /// Network faults wait at least this long per consecutive error
    pub network_floor_per_error: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            factor: 1.5,
            max_delay: Duration::from_secs(10),
            short_session: Duration::from_millis(500),
            short_session_limit: 5,
            storm_cooldown: Duration::from_secs(5),
            network_floor_per_error: Duration::from_secs(2),
        }
    }
}

impl RestartPolicy {
    /// Compute the restart delay.
    ///
    /// Non-decreasing in `error_count` and never above `max_delay`.
    pub fn delay(&self, error_count: u32, short_sessions: u32, network: bool) -> Duration {
        let ceiling = self.max_delay.as_secs_f64();
        let geometric = (self.base_delay.as_secs_f64() * self.factor.powi(error_count.min(i32::MAX as u32) as i32)).min(ceiling);
        let mut delay = Duration::from_secs_f64(geometric.max(0.0));

        if network {
            delay = delay.max(self.network_floor_per_error.saturating_mul(error_count));
        }
        if short_sessions >= self.short_session_limit {
            delay = delay.max(self.storm_cooldown);
        }

        delay.min(self.max_delay)
    }
}

/// Thresholds on consecutive transport faults
#[derive(Debug, Clone)]
pub struct FailoverPolicy {
    /// Probe the local engine and switch to it
    pub switch_after: u32,
    /// Give up if the local engine is unhealthy too
    pub terminal_after: u32,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            switch_after: 3,
            terminal_after: 5,
        }
    }
}

/// What a transport fault led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// Restart the current provider after backoff
    Retry,
    /// Failed over to the local engine
    SwitchedToLocal,
    /// No healthy provider left
    Terminal,
}

/// Receives every recognizer event together with its session generation
pub type EventSink = Arc<dyn Fn(u64, RecognizerEvent) + Send + Sync>;

pub struct TranscriptionOrchestrator {
    streaming: Option<Arc<dyn AsrEngine>>,
    local: Option<Arc<dyn AsrEngine>>,
    active: Option<SttProvider>,
    /// Set after a failover; only an explicit switch clears it
    locked_to_local: bool,
    transport_faults: u32,
    generation: u64,
    running: bool,
    forwarder: Option<JoinHandle<()>>,
    sink: EventSink,
    failover: FailoverPolicy,
    probe_timeout: Duration,
}

impl TranscriptionOrchestrator {
    pub fn new(
        streaming: Option<Arc<dyn AsrEngine>>,
        local: Option<Arc<dyn AsrEngine>>,
        sink: EventSink,
        failover: FailoverPolicy,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            streaming,
            local,
            active: None,
            locked_to_local: false,
            transport_faults: 0,
            generation: 0,
            running: false,
            forwarder: None,
            sink,
            failover,
            probe_timeout,
        }
    }

    pub fn active(&self) -> Option<SttProvider> {
        self.active
    }

    /// Generation of the current session. Events tagged with an older
    /// generation come from a session that has been replaced.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_locked_to_local(&self) -> bool {
        self.locked_to_local
    }

    fn engine(&self, provider: SttProvider) -> Option<&Arc<dyn AsrEngine>> {
        match provider {
            SttProvider::Streaming => self.streaming.as_ref(),
            SttProvider::Local => self.local.as_ref(),
        }
    }

    fn active_engine(&self) -> Option<Arc<dyn AsrEngine>> {
        self.active.and_then(|p| self.engine(p).cloned())
    }

    /// Probe the local engine with the configured ceiling
    pub async fn probe_local(&self) -> bool {
        let Some(local) = self.local.as_ref() else {
            return false;
        };
        match tokio::time::timeout(self.probe_timeout, local.probe()).await {
            Ok(healthy) => healthy,
            Err(_) => {
                warn!("⏱️ Local transcription probe timed out");
                false
            }
        }
    }

    /// Apply a provider preference. Aborts any running session first.
    pub async fn select(&mut self, preference: SttPreference) -> Result<SttProvider, RecognitionFault> {
        self.abort();
        self.locked_to_local = false;
        self.transport_faults = 0;

        let provider = match preference {
            SttPreference::Streaming => {
                if self.streaming.is_some() {
                    SttProvider::Streaming
                } else {
                    warn!("⚠️ No streaming recognizer configured, using local engine");
                    SttProvider::Local
                }
            }
            SttPreference::Local => {
                if !self.probe_local().await {
                    self.active = None;
                    return Err(RecognitionFault::Unavailable(
                        "local transcription engine is not available".to_string(),
                    ));
                }
                self.locked_to_local = true;
                SttProvider::Local
            }
            SttPreference::Auto => {
                if self.probe_local().await {
                    SttProvider::Local
                } else if self.streaming.is_some() {
                    info!("🔄 Local transcription unavailable, using streaming recognizer");
                    SttProvider::Streaming
                } else {
                    self.active = None;
                    return Err(RecognitionFault::Unavailable(
                        "no transcription provider available".to_string(),
                    ));
                }
            }
        };

        if self.engine(provider).is_none() {
            self.active = None;
            return Err(RecognitionFault::Unavailable(format!("no {} engine configured", provider)));
        }

        info!("🎧 Transcription provider: {} ({:?})", provider, preference);
        self.active = Some(provider);
        Ok(provider)
    }

    /// Start a session on the active provider under a new generation
    pub async fn start(&mut self) -> Result<u64, RecognitionFault> {
        let engine = self
            .active_engine()
            .ok_or_else(|| RecognitionFault::Unavailable("no provider selected".to_string()))?;

        self.halt_forwarder();
        self.generation += 1;
        let generation = self.generation;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = self.sink.clone();
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink(generation, event);
            }
        }));

        engine.start(tx).await?;
        self.running = true;
        debug!(generation, provider = engine.name(), "recognition session started");
        Ok(generation)
    }

    /// The session reported `Ended`
    pub fn mark_ended(&mut self, generation: u64) {
        if generation == self.generation {
            self.running = false;
        }
    }

    /// Graceful stop: pending results are still delivered
    pub fn stop(&mut self) {
        if let Some(engine) = self.active_engine() {
            engine.stop();
        }
        self.running = false;
    }

    /// Drop the session and everything it may still emit
    pub fn abort(&mut self) {
        if let Some(engine) = self.active_engine() {
            engine.abort();
        }
        self.halt_forwarder();
        self.generation += 1;
        self.running = false;
    }

    pub fn finalize(&self) {
        if let Some(engine) = self.active_engine() {
            engine.finalize();
        }
    }

    /// A result came through; the transport is healthy again
    pub fn note_success(&mut self) {
        self.transport_faults = 0;
    }

    /// Count a transport fault and decide on failover
    pub async fn on_transport_fault(&mut self) -> FaultOutcome {
        self.transport_faults += 1;
        let faults = self.transport_faults;

        if faults < self.failover.switch_after {
            return FaultOutcome::Retry;
        }

        let local_healthy = self.probe_local().await;
        if self.active == Some(SttProvider::Streaming) && local_healthy {
            warn!(faults, "🔄 Streaming recognizer keeps failing, switching to local engine");
            self.abort();
            self.active = Some(SttProvider::Local);
            self.locked_to_local = true;
            self.transport_faults = 0;
            return FaultOutcome::SwitchedToLocal;
        }

        if faults >= self.failover.terminal_after && !local_healthy {
            warn!(faults, "❌ No healthy transcription provider left");
            self.abort();
            return FaultOutcome::Terminal;
        }

        FaultOutcome::Retry
    }

    fn halt_forwarder(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

impl Drop for TranscriptionOrchestrator {
    fn drop(&mut self) {
        self.halt_forwarder();
    }
}
