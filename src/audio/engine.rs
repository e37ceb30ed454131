//! Native audio output with rodio
//!
//! rodio's output stream is not `Send`, so every context spawns a
//! dedicated audio thread that owns the stream and sink, and is driven
//! over a channel.

use super::{closed_error, AudioClip, AudioContext, OutputBackend};
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Commands sent to the audio thread
enum AudioCommand {
    Play(AudioClip, oneshot::Sender<()>),
    Stop,
    Pause,
    Resume,
    Close,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RodioOutput;

impl OutputBackend for RodioOutput {
    fn open(&self) -> VoiceResult<Arc<dyn AudioContext>> {
        Ok(Arc::new(SoundEngine::new()?))
    }

    fn name(&self) -> &str {
        "rodio"
    }
}

/// Thread-backed output context
pub struct SoundEngine {
    sender: mpsc::Sender<AudioCommand>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for SoundEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundEngine")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl SoundEngine {
    pub fn new() -> VoiceResult<Self> {
        let (sender, receiver) = mpsc::channel::<AudioCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let closed = Arc::new(AtomicBool::new(false));
        let thread_closed = closed.clone();

        thread::Builder::new()
            .name("jarvis-audio".to_string())
            .spawn(move || Self::audio_thread(receiver, ready_tx, thread_closed))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { sender, closed }),
            Ok(Err(e)) => Err(VoiceError::Audio(e)),
            Err(_) => Err(VoiceError::Audio("audio thread exited".to_string())),
        }
    }

    fn audio_thread(
        receiver: mpsc::Receiver<AudioCommand>,
        ready: mpsc::Sender<Result<(), String>>,
        closed: Arc<AtomicBool>,
    ) {
        use rodio::OutputStream;

        let (stream, stream_handle) = match OutputStream::try_default() {
            Ok(s) => s,
            Err(e) => {
                warn!("🔇 Failed to initialize audio output: {}", e);
                let _ = ready.send(Err(e.to_string()));
                return;
            }
        };

        // Keep stream alive
        let _stream = stream;
        let mut sink = match rodio::Sink::try_new(&stream_handle) {
            Ok(s) => s,
            Err(e) => {
                error!("❌ Failed to create audio sink: {}", e);
                let _ = ready.send(Err(e.to_string()));
                return;
            }
        };
        let _ = ready.send(Ok(()));
        debug!("🔊 Audio thread started");

        let mut pending: Option<oneshot::Sender<()>> = None;
        loop {
            let cmd = if pending.is_some() {
                // Poll for commands while a clip plays so Stop can cut it off
                match receiver.recv_timeout(std::time::Duration::from_millis(20)) {
                    Ok(cmd) => Some(cmd),
                    Err(mpsc::RecvTimeoutError::Timeout) => None,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match receiver.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => break,
                }
            };

            match cmd {
                Some(AudioCommand::Play(clip, done)) => {
                    let source =
                        rodio::buffer::SamplesBuffer::new(clip.channels, clip.sample_rate, clip.samples);
                    sink.append(source);
                    sink.play();
                    if let Some(previous) = pending.replace(done) {
                        let _ = previous.send(());
                    }
                }
                Some(AudioCommand::Stop) => {
                    sink.stop();
                    // A stopped sink cannot be reused
                    if let Ok(new_sink) = rodio::Sink::try_new(&stream_handle) {
                        sink = new_sink;
                    }
                    if let Some(done) = pending.take() {
                        let _ = done.send(());
                    }
                }
                Some(AudioCommand::Pause) => sink.pause(),
                Some(AudioCommand::Resume) => sink.play(),
                Some(AudioCommand::Close) => break,
                None => {}
            }

            if pending.is_some() && sink.empty() {
                if let Some(done) = pending.take() {
                    let _ = done.send(());
                }
            }
        }

        sink.stop();
        if let Some(done) = pending.take() {
            let _ = done.send(());
        }
        closed.store(true, Ordering::SeqCst);
        info!("🔇 Audio thread stopped");
    }

    fn send(&self, cmd: AudioCommand) -> VoiceResult<()> {
        self.sender
            .send(cmd)
            .map_err(|e| VoiceError::Audio(format!("Audio thread disconnected: {}", e)))
    }
}

#[async_trait]
impl AudioContext for SoundEngine {
    async fn play(&self, clip: &AudioClip) -> VoiceResult<()> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let (tx, rx) = oneshot::channel();
        self.send(AudioCommand::Play(clip.clone(), tx))?;
        rx.await
            .map_err(|_| VoiceError::Audio("audio thread dropped playback".to_string()))
    }

    fn stop(&self) {
        let _ = self.send(AudioCommand::Stop);
    }

    fn suspend(&self) {
        let _ = self.send(AudioCommand::Pause);
    }

    fn resume(&self) {
        let _ = self.send(AudioCommand::Resume);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.send(AudioCommand::Close);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
