//! Streaming recognizer using Vosk
//!
//! Decoding runs on a blocking task fed from the microphone broadcast.
//! Partial hypotheses are forwarded as they change; Vosk's own endpointing
//! produces the final results.

use super::{extract_text, AsrEngine, RecognizerEvent, SttProvider};
use crate::audio::{Microphone, CAPTURE_SAMPLE_RATE};
use crate::error::RecognitionFault;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use vosk::{DecodingState, Model, Recognizer};

struct Session {
    stop: Arc<AtomicBool>,
    flush: Arc<AtomicBool>,
}

/// Vosk-based streaming recognizer
pub struct VoskRecognizer {
    model_path: PathBuf,
    model: OnceLock<Arc<Model>>,
    mic: Arc<dyn Microphone>,
    session: Mutex<Option<Session>>,
}

impl VoskRecognizer {
    pub fn new(model_path: impl Into<PathBuf>, mic: Arc<dyn Microphone>) -> Self {
        Self {
            model_path: model_path.into(),
            model: OnceLock::new(),
            mic,
            session: Mutex::new(None),
        }
    }

    /// Find a Vosk model in the standard locations
    pub fn find_model_path() -> Option<PathBuf> {
        let candidates: Vec<Option<PathBuf>> = vec![
            dirs::data_dir().map(|d| d.join("vosk/model")),
            Some(PathBuf::from("/usr/share/vosk/model")),
            Some(PathBuf::from("/usr/local/share/vosk/model")),
            dirs::home_dir().map(|d| d.join(".vosk/model")),
        ];
        candidates.into_iter().flatten().find(|p| p.exists())
    }

    fn load_model(&self) -> Result<Arc<Model>, RecognitionFault> {
        if let Some(model) = self.model.get() {
            return Ok(model.clone());
        }

        let path = self.model_path.to_str().ok_or_else(|| {
            RecognitionFault::Unavailable(format!(
                "Vosk model path is not valid UTF-8: {}",
                self.model_path.display()
            ))
        })?;
        info!("Loading Vosk model from: {}", self.model_path.display());
        let model = Model::new(path)
            .map(Arc::new)
            .ok_or_else(|| RecognitionFault::Unavailable("failed to load Vosk model".to_string()))?;
        Ok(self.model.get_or_init(|| model).clone())
    }

    fn end_session(&self, flush: bool) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(session) = session {
            session.flush.store(flush, Ordering::SeqCst);
            session.stop.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl AsrEngine for VoskRecognizer {
    fn provider(&self) -> SttProvider {
        SttProvider::Streaming
    }

    fn name(&self) -> &str {
        "vosk"
    }

    async fn probe(&self) -> bool {
        self.model_path.exists()
    }

    async fn start(&self, events: mpsc::UnboundedSender<RecognizerEvent>) -> Result<(), RecognitionFault> {
        self.end_session(false);

        let model = self.load_model()?;
        let mut recognizer = Recognizer::new(&model, CAPTURE_SAMPLE_RATE as f32)
            .ok_or_else(|| RecognitionFault::Unavailable("failed to create Vosk recognizer".to_string()))?;
        recognizer.set_partial_words(false);

        let stop = Arc::new(AtomicBool::new(false));
        let flush = Arc::new(AtomicBool::new(false));
        let mut frames = self.mic.subscribe();
        let (task_stop, task_flush) = (stop.clone(), flush.clone());

        tokio::task::spawn_blocking(move || {
            let mut last_partial = String::new();
            loop {
                if task_stop.load(Ordering::SeqCst) {
                    if task_flush.load(Ordering::SeqCst) {
                        if let Some(text) = recognizer.final_result().single().and_then(|r| extract_text(r.text)) {
                            let _ = events.send(RecognizerEvent::Final(text));
                        }
                        let _ = events.send(RecognizerEvent::Ended);
                    }
                    debug!("🎧 Vosk session closed");
                    return;
                }

                let frame = match frames.blocking_recv() {
                    Ok(frame) => frame,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Vosk fell behind capture");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = events.send(RecognizerEvent::Fault(RecognitionFault::AudioCapture(
                            "capture stream closed".to_string(),
                        )));
                        let _ = events.send(RecognizerEvent::Ended);
                        return;
                    }
                };

                match recognizer.accept_waveform(&frame) {
                    DecodingState::Finalized => {
                        last_partial.clear();
                        if let Some(text) = recognizer.final_result().single().and_then(|r| extract_text(r.text)) {
                            let _ = events.send(RecognizerEvent::Final(text));
                        }
                    }
                    DecodingState::Running => {
                        let partial = recognizer.partial_result().partial.trim().to_string();
                        if !partial.is_empty() && partial != last_partial {
                            let _ = events.send(RecognizerEvent::Partial(partial.clone()));
                            last_partial = partial;
                        }
                    }
                    DecodingState::Failed => {
                        warn!("Vosk decoding failed for this chunk");
                        let _ = events.send(RecognizerEvent::Fault(RecognitionFault::Aborted));
                    }
                }
            }
        });

        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(Session { stop, flush });
        info!("🎧 Vosk session started");
        Ok(())
    }

    fn stop(&self) {
        self.end_session(true);
    }

    fn abort(&self) {
        self.end_session(false);
    }
}
