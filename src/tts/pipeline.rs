//! Speech output pipeline
//!
//! Splits a reply into chunks and walks each chunk down the provider chain
//! until one engine succeeds. Every chunk borrows one pooled audio handle
//! and gives it back whatever happens, including cancellation.

use super::{split_into_chunks, Rendered, TtsEngine, VoiceMode, VoiceParams};
use crate::audio::{AudioContext, AudioLease, AudioResourcePool};
use crate::error::SynthesisFault;
use crate::utils::collapse_whitespace;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    Completed,
    Cancelled,
    /// Every engine in the chain failed for some chunk
    Failed,
}

/// The synthesis engines available to the pipeline
#[derive(Debug, Clone)]
pub struct SynthesisEngines {
    pub system: Arc<dyn TtsEngine>,
    pub piper: Option<Arc<dyn TtsEngine>>,
    pub cloud: Option<Arc<dyn TtsEngine>>,
}

impl SynthesisEngines {
    /// Provider chain for a voice mode; platform synthesis always ends it
    pub fn chain_for(&self, mode: VoiceMode) -> Vec<Arc<dyn TtsEngine>> {
        let preferred = match mode {
            VoiceMode::System => None,
            VoiceMode::Piper => self.piper.clone(),
            VoiceMode::Gemini => self.cloud.clone(),
        };
        preferred
            .into_iter()
            .chain(std::iter::once(self.system.clone()))
            .collect()
    }
}

/// Clears a flag when dropped
struct FlagGuard(Arc<AtomicBool>);

impl FlagGuard {
    fn raise(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag.clone())
    }
}

impl Drop for FlagGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A chunk's lease, tagged with the ticket of the chunk that parked it.
/// Pool ids are reused, so only the ticket identifies the owner.
struct ParkedLease {
    ticket: u64,
    lease: AudioLease,
}

type LeaseSlot = Arc<Mutex<Option<ParkedLease>>>;

/// Parks the chunk's lease where `halt()` can reach it. On drop it releases
/// the lease only if the slot still holds this chunk's ticket.
struct LeaseGuard {
    slot: LeaseSlot,
    ticket: u64,
}

impl LeaseGuard {
    fn park(slot: &LeaseSlot, ticket: u64, lease: Option<AudioLease>) -> Self {
        let previous = std::mem::replace(
            &mut *slot.lock().unwrap_or_else(|e| e.into_inner()),
            lease.map(|lease| ParkedLease { ticket, lease }),
        );
        // Released outside the slot lock
        drop(previous);
        Self {
            slot: slot.clone(),
            ticket,
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let parked = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            if slot.as_ref().map(|p| p.ticket) == Some(self.ticket) {
                slot.take()
            } else {
                None
            }
        };
        drop(parked);
    }
}

#[derive(Clone)]
pub struct SpeechOutputPipeline {
    chain: Arc<Vec<Arc<dyn TtsEngine>>>,
    pool: AudioResourcePool,
    max_chunk_chars: usize,
    reply_dedup_window: Duration,
    last_reply: Arc<Mutex<Option<(String, Instant)>>>,
    current_lease: LeaseSlot,
    next_ticket: Arc<AtomicU64>,
    audio_active: Arc<AtomicBool>,
}

impl std::fmt::Debug for SpeechOutputPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.chain.iter().map(|e| e.name()).collect();
        f.debug_struct("SpeechOutputPipeline")
            .field("chain", &names)
            .field("max_chunk_chars", &self.max_chunk_chars)
            .finish()
    }
}

impl SpeechOutputPipeline {
    pub fn new(
        chain: Vec<Arc<dyn TtsEngine>>,
        pool: AudioResourcePool,
        max_chunk_chars: usize,
        reply_dedup_window: Duration,
    ) -> Self {
        Self {
            chain: Arc::new(chain),
            pool,
            max_chunk_chars,
            reply_dedup_window,
            last_reply: Arc::new(Mutex::new(None)),
            current_lease: Arc::new(Mutex::new(None)),
            next_ticket: Arc::new(AtomicU64::new(0)),
            audio_active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_chain(&mut self, chain: Vec<Arc<dyn TtsEngine>>) {
        let names: Vec<&str> = chain.iter().map(|e| e.name()).collect();
        info!("🗣️ Synthesis chain: {}", names.join(" → "));
        self.chain = Arc::new(chain);
    }

    pub fn chain_names(&self) -> Vec<String> {
        self.chain.iter().map(|e| e.name().to_string()).collect()
    }

    /// Audio is reaching the speakers right now
    pub fn is_audio_active(&self) -> bool {
        self.audio_active.load(Ordering::SeqCst)
    }

    /// Id of the handle the current chunk is playing through
    pub fn current_handle(&self) -> Option<u64> {
        self.current_lease
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|parked| parked.lease.id())
    }

    /// True if the same reply was accepted within the dedup window.
    /// A novel reply is recorded.
    pub fn is_repeat(&self, text: &str, now: Instant) -> bool {
        let normalized = collapse_whitespace(text);
        let mut last = self.last_reply.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((previous, at)) = last.as_ref() {
            if *previous == normalized && now.duration_since(*at) < self.reply_dedup_window {
                return true;
            }
        }
        *last = Some((normalized, now));
        false
    }

    /// Stop playback now and hand the current handle back to the pool
    pub fn halt(&self) {
        let lease = self
            .current_lease
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(ParkedLease { lease, .. }) = lease {
            lease.stop();
            debug!(id = lease.id(), "🔇 Playback halted");
        }
        self.audio_active.store(false, Ordering::SeqCst);
    }

    /// Speak a reply chunk by chunk until done or cancelled
    pub async fn speak(&self, text: &str, params: &VoiceParams, cancel: &CancellationToken) -> SpeakOutcome {
        let chunks = split_into_chunks(text, self.max_chunk_chars);
        debug!(chunks = chunks.len(), "🗣️ Speaking reply");

        for chunk in &chunks {
            if cancel.is_cancelled() {
                return SpeakOutcome::Cancelled;
            }
            match self.speak_chunk(chunk, params, cancel).await {
                SpeakOutcome::Completed => {}
                other => return other,
            }
        }
        SpeakOutcome::Completed
    }

    async fn speak_chunk(&self, chunk: &str, params: &VoiceParams, cancel: &CancellationToken) -> SpeakOutcome {
        let chain = self.chain.clone();
        for engine in chain.iter() {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SpeakOutcome::Cancelled,
                result = self.render_and_play(engine.as_ref(), chunk, params) => result,
            };
            match result {
                Ok(()) => return SpeakOutcome::Completed,
                Err(fault) => warn!("⚠️ {} failed ({}), trying next engine", engine.name(), fault),
            }
        }
        warn!("❌ All synthesis engines failed for chunk");
        SpeakOutcome::Failed
    }

    async fn render_and_play(&self, engine: &dyn TtsEngine, chunk: &str, params: &VoiceParams) -> Result<(), SynthesisFault> {
        let lease = self.pool.acquire();
        let context: Option<Arc<dyn AudioContext>> = lease.as_ref().map(|l| l.context().clone());
        if context.is_none() && !engine.self_playing() {
            return Err(SynthesisFault::NoAudioHandle);
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let _lease = LeaseGuard::park(&self.current_lease, ticket, lease);

        let rendered = if engine.self_playing() {
            let _active = FlagGuard::raise(&self.audio_active);
            engine.synthesize(chunk, params).await?
        } else {
            engine.synthesize(chunk, params).await?
        };

        match (rendered, context) {
            (Rendered::Spoken, _) => Ok(()),
            (Rendered::Audio(clip), Some(context)) => {
                let _active = FlagGuard::raise(&self.audio_active);
                context
                    .play(&clip)
                    .await
                    .map_err(|e| SynthesisFault::Failed(e.to_string()))
            }
            (Rendered::Audio(_), None) => Err(SynthesisFault::NoAudioHandle),
        }
    }
}
