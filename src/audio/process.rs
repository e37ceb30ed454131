//! Audio output through the ALSA `aplay` utility
//!
//! Each context plays one clip at a time by piping a WAV into a player
//! process. Stopping or closing the context kills the process.

use super::{closed_error, AudioClip, AudioContext, OutputBackend};
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Spawns player processes for each context
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    program: String,
    args: Vec<String>,
    next_id: Arc<AtomicU64>,
}

impl Default for ProcessOutput {
    fn default() -> Self {
        Self::new("aplay", vec!["-q".to_string(), "-".to_string()])
    }
}

impl ProcessOutput {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl OutputBackend for ProcessOutput {
    fn open(&self) -> VoiceResult<Arc<dyn AudioContext>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Arc::new(ProcessContext {
            id,
            program: self.program.clone(),
            args: self.args.clone(),
            stop: Notify::new(),
            closed: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[derive(Debug)]
pub struct ProcessContext {
    id: u64,
    program: String,
    args: Vec<String>,
    stop: Notify,
    closed: AtomicBool,
    suspended: AtomicBool,
}

#[async_trait]
impl AudioContext for ProcessContext {
    async fn play(&self, clip: &AudioClip) -> VoiceResult<()> {
        if self.is_closed() {
            return Err(closed_error());
        }
        self.suspended.store(false, Ordering::Relaxed);

        let wav = clip.to_wav_bytes()?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VoiceError::Audio(format!("failed to spawn {}: {}", self.program, e)))?;

        let stopped = self.stop.notified();
        tokio::pin!(stopped);

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Audio("player stdin unavailable".to_string()))?;

        let feed = async move {
            stdin.write_all(&wav).await?;
            stdin.shutdown().await?;
            Ok::<_, std::io::Error>(())
        };

        tokio::select! {
            result = feed => {
                if let Err(e) = result {
                    let _ = child.kill().await;
                    return Err(VoiceError::Audio(format!("player rejected audio: {}", e)));
                }
            }
            _ = &mut stopped => {
                debug!(id = self.id, "playback stopped while feeding");
                let _ = child.kill().await;
                return Ok(());
            }
        }

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if !status.success() {
                    warn!(id = self.id, "player exited with {}", status);
                    return Err(VoiceError::Audio(format!("player exited with {}", status)));
                }
                Ok(())
            }
            _ = &mut stopped => {
                debug!(id = self.id, "playback stopped");
                let _ = child.kill().await;
                Ok(())
            }
        }
    }

    fn stop(&self) {
        self.stop.notify_waiters();
    }

    fn suspend(&self) {
        self.suspended.store(true, Ordering::Relaxed);
    }

    fn resume(&self) {
        self.suspended.store(false, Ordering::Relaxed);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_context_refuses_playback() {
        let backend = ProcessOutput::default();
        let context = backend.open().expect("open");
        context.close();
        assert!(context.is_closed());

        let clip = AudioClip::new(vec![0; 160], 16000);
        assert!(context.play(&clip).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_player_is_an_error() {
        let backend = ProcessOutput::new("jarvis-voice-no-such-player", vec![]);
        let context = backend.open().expect("open");
        let clip = AudioClip::new(vec![0; 160], 16000);
        assert!(matches!(context.play(&clip).await, Err(VoiceError::Audio(_))));
    }
}
