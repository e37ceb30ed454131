//! Mock audio devices
//!
//! A microphone that never captures and an output backend whose contexts
//! "play" by sleeping for the clip length.

use async_trait::async_trait;
use jarvis_voice::audio::capture::AudioFrame;
use jarvis_voice::audio::{AudioClip, AudioContext, LevelMeter, Microphone, OutputBackend};
use jarvis_voice::error::{VoiceError, VoiceResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};

pub struct MockMicrophone {
    grant: AtomicBool,
    running: AtomicBool,
    starts: AtomicUsize,
    tx: broadcast::Sender<AudioFrame>,
    meter: LevelMeter,
}

impl MockMicrophone {
    pub fn new(grant: bool) -> Arc<Self> {
        let (tx, _) = broadcast::channel(8);
        Arc::new(Self {
            grant: AtomicBool::new(grant),
            running: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            tx,
            meter: LevelMeter::new(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn set_level(&self, energy: f32) {
        self.meter.set(energy);
    }
}

#[async_trait]
impl Microphone for MockMicrophone {
    async fn request_access(&self) -> VoiceResult<()> {
        if self.grant.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VoiceError::PermissionDenied("mock microphone".to_string()))
        }
    }

    fn start(&self) -> VoiceResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.tx.subscribe()
    }

    fn level(&self) -> LevelMeter {
        self.meter.clone()
    }
}

/// Shared counters for every context a backend has opened
#[derive(Debug, Default)]
pub struct OutputStats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub playing: AtomicUsize,
    pub stops: AtomicUsize,
    /// Clips that played to the end
    pub completed: AtomicUsize,
}

#[derive(Debug)]
pub struct MockContext {
    stats: Arc<OutputStats>,
    closed: AtomicBool,
    stopped: Notify,
}

struct PlayingGuard<'a>(&'a OutputStats);

impl Drop for PlayingGuard<'_> {
    fn drop(&mut self) {
        self.0.playing.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioContext for MockContext {
    async fn play(&self, clip: &AudioClip) -> VoiceResult<()> {
        if self.is_closed() {
            return Err(VoiceError::Audio("closed".to_string()));
        }
        self.stats.playing.fetch_add(1, Ordering::SeqCst);
        let _guard = PlayingGuard(&self.stats);
        tokio::select! {
            _ = tokio::time::sleep(clip.duration()) => {
                self.stats.completed.fetch_add(1, Ordering::SeqCst);
            }
            _ = self.stopped.notified() => {}
        }
        Ok(())
    }

    fn stop(&self) {
        self.stats.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped.notify_waiters();
    }

    fn suspend(&self) {}

    fn resume(&self) {}

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockOutput {
    pub stats: Arc<OutputStats>,
}

impl MockOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn playing(&self) -> usize {
        self.stats.playing.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stats.stops.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.stats.completed.load(Ordering::SeqCst)
    }
}

impl OutputBackend for MockOutput {
    fn open(&self) -> VoiceResult<Arc<dyn AudioContext>> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockContext {
            stats: self.stats.clone(),
            closed: AtomicBool::new(false),
            stopped: Notify::new(),
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
