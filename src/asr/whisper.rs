//! Local Whisper transcription server client
//!
//! Push-to-finalize: microphone frames are buffered while speech is
//! detected and each finished utterance is posted to `/transcribe` as a
//! WAV upload. The engine can force submission early with `finalize()`.

use super::{extract_text, AsrEngine, RecognizerEvent, SttProvider};
use crate::audio::{calculate_energy, AudioClip, Microphone, CAPTURE_SAMPLE_RATE};
use crate::error::RecognitionFault;
use crate::vad::{ActivityDetector, VadSettings, VadSignal};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::Instant;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Utterances shorter than this are noise, not speech
const MIN_UTTERANCE: Duration = Duration::from_millis(300);

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(rename = "isFinal", default)]
    is_final: bool,
    #[serde(default)]
    processing_time: Option<f64>,
}

/// Handles for the running session
struct Session {
    cancel: CancellationToken,
    finalize: Arc<Notify>,
    flush_on_stop: Arc<AtomicBool>,
}

/// HTTP client half, shared with the session task
#[derive(Clone)]
struct WhisperClient {
    client: reqwest::Client,
    base_url: String,
    language: String,
}

impl WhisperClient {
    async fn transcribe(&self, clip: &AudioClip) -> Result<Option<String>, RecognitionFault> {
        let wav = clip
            .to_wav_bytes()
            .map_err(|e| RecognitionFault::AudioCapture(e.to_string()))?;

        // One retry with a short pause
        let strategy = FixedInterval::from_millis(250).take(1);
        Retry::spawn(strategy, || self.submit(wav.clone())).await
    }

    async fn submit(&self, wav: Vec<u8>) -> Result<Option<String>, RecognitionFault> {
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| RecognitionFault::Unavailable(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("audio", part)
            .text("language", self.language.clone())
            .text("partial", "false");

        let response = self
            .client
            .post(format!("{}/transcribe", self.base_url))
            .multipart(form)
            .timeout(TRANSCRIBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| RecognitionFault::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("❌ Whisper server error ({}): {}", status, body);
            return Err(RecognitionFault::Unavailable(format!("HTTP {}", status)));
        }

        let result: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| RecognitionFault::Unavailable(e.to_string()))?;
        debug!(
            is_final = result.is_final,
            processing_time = result.processing_time.unwrap_or_default(),
            "📝 Whisper: '{}'",
            result.text
        );
        Ok(extract_text(&result.text))
    }
}

/// Local push-to-finalize recognizer
pub struct WhisperRecognizer {
    http: WhisperClient,
    mic: Arc<dyn Microphone>,
    vad: VadSettings,
    session: Mutex<Option<Session>>,
}

impl WhisperRecognizer {
    pub fn new(base_url: impl Into<String>, language: impl Into<String>, mic: Arc<dyn Microphone>, vad: VadSettings) -> Self {
        Self {
            http: WhisperClient {
                client: reqwest::Client::new(),
                base_url: base_url.into().trim_end_matches('/').to_string(),
                language: language.into(),
            },
            mic,
            vad,
            session: Mutex::new(None),
        }
    }

    fn end_session(&self, flush: bool) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(session) = session {
            session.flush_on_stop.store(flush, Ordering::SeqCst);
            session.cancel.cancel();
        }
    }
}

#[async_trait]
impl AsrEngine for WhisperRecognizer {
    fn provider(&self) -> SttProvider {
        SttProvider::Local
    }

    fn name(&self) -> &str {
        "whisper"
    }

    async fn probe(&self) -> bool {
        let response = self
            .http
            .client
            .get(format!("{}/health", self.http.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<HealthResponse>().await {
                Ok(health) => health.status == "ok",
                Err(_) => false,
            },
            Ok(resp) => {
                debug!("Whisper health check returned {}", resp.status());
                false
            }
            Err(e) => {
                debug!("Whisper health check failed: {}", e);
                false
            }
        }
    }

    async fn start(&self, events: mpsc::UnboundedSender<RecognizerEvent>) -> Result<(), RecognitionFault> {
        // A new session replaces any previous one
        self.end_session(false);

        let session = Session {
            cancel: CancellationToken::new(),
            finalize: Arc::new(Notify::new()),
            flush_on_stop: Arc::new(AtomicBool::new(false)),
        };
        let frames = self.mic.subscribe();
        let task = SessionTask {
            http: self.http.clone(),
            detector: ActivityDetector::new(self.vad.clone()),
            cancel: session.cancel.clone(),
            finalize: session.finalize.clone(),
            flush_on_stop: session.flush_on_stop.clone(),
            events,
        };
        tokio::spawn(task.run(frames));

        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session);
        info!("🎧 Whisper session started ({})", self.http.base_url);
        Ok(())
    }

    fn stop(&self) {
        self.end_session(true);
    }

    fn abort(&self) {
        self.end_session(false);
    }

    fn finalize(&self) {
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = session.as_ref() {
            session.finalize.notify_one();
        }
    }
}

struct SessionTask {
    http: WhisperClient,
    detector: ActivityDetector,
    cancel: CancellationToken,
    finalize: Arc<Notify>,
    flush_on_stop: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<RecognizerEvent>,
}

impl SessionTask {
    async fn run(mut self, mut frames: broadcast::Receiver<crate::audio::capture::AudioFrame>) {
        let mut buffer: Vec<i16> = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    if self.flush_on_stop.load(Ordering::SeqCst) {
                        let samples = std::mem::take(&mut buffer);
                        let _ = self.submit(samples).await;
                        let _ = self.events.send(RecognizerEvent::Ended);
                    }
                    debug!("🎧 Whisper session closed");
                    return;
                }
                _ = self.finalize.notified() => {
                    self.detector.reset();
                    let samples = std::mem::take(&mut buffer);
                    if !self.submit(samples).await {
                        break;
                    }
                }
                frame = frames.recv() => match frame {
                    Ok(frame) => {
                        let signal = self.detector.sample(calculate_energy(&frame), Instant::now());
                        if self.detector.is_speaking() || signal.is_some() {
                            buffer.extend_from_slice(&frame);
                        }
                        if let Some(VadSignal::Finalize(_)) = signal {
                            let samples = std::mem::take(&mut buffer);
                            if !self.submit(samples).await {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Whisper session fell behind capture");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = self.events.send(RecognizerEvent::Fault(
                            RecognitionFault::AudioCapture("capture stream closed".to_string()),
                        ));
                        break;
                    }
                },
            }
        }

        let _ = self.events.send(RecognizerEvent::Ended);
    }

    /// Transcribe one utterance. Returns false when the session should end.
    async fn submit(&self, samples: Vec<i16>) -> bool {
        let clip = AudioClip::new(samples, CAPTURE_SAMPLE_RATE);
        if clip.duration() < MIN_UTTERANCE {
            if !clip.is_empty() {
                debug!("🔇 Discarding {}ms utterance", clip.duration().as_millis());
            }
            return true;
        }

        match self.http.transcribe(&clip).await {
            Ok(Some(text)) => {
                let _ = self.events.send(RecognizerEvent::Final(text));
                true
            }
            Ok(None) => {
                let _ = self.events.send(RecognizerEvent::Fault(RecognitionFault::NoSpeech));
                true
            }
            Err(fault) => {
                warn!("⚠️ Whisper transcription failed: {}", fault);
                let keep_going = fault.kind() == crate::error::FaultKind::Transient;
                let _ = self.events.send(RecognizerEvent::Fault(fault));
                keep_going
            }
        }
    }
}
