//! Microphone capture
//!
//! Capture publishes 100 ms mono 16 kHz frames on a broadcast channel so the
//! active recognizer and the VAD can read the same stream, and keeps a
//! `LevelMeter` current with the energy of the latest frame.

use super::{calculate_energy, pcm_to_samples, LevelMeter, CAPTURE_FRAME_SAMPLES, CAPTURE_SAMPLE_RATE};
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One capture frame
pub type AudioFrame = Arc<[i16]>;

/// Frames buffered per subscriber before the oldest are dropped
const FRAME_BACKLOG: usize = 64;

#[async_trait]
pub trait Microphone: Send + Sync {
    /// Ask for capture access. Fails with `PermissionDenied` when no usable
    /// capture device is available.
    async fn request_access(&self) -> VoiceResult<()>;

    fn start(&self) -> VoiceResult<()>;

    fn stop(&self);

    fn subscribe(&self) -> broadcast::Receiver<AudioFrame>;

    fn level(&self) -> LevelMeter;
}

/// Publish a captured frame: update the meter, fan out to subscribers
fn publish(tx: &broadcast::Sender<AudioFrame>, meter: &LevelMeter, samples: Vec<i16>) {
    meter.set(calculate_energy(&samples));
    // No subscribers is fine
    let _ = tx.send(Arc::from(samples));
}

/// Capture through the ALSA `arecord` utility
pub struct ArecordMicrophone {
    device: Option<String>,
    tx: broadcast::Sender<AudioFrame>,
    meter: LevelMeter,
    running: Mutex<Option<CancellationToken>>,
}

impl Default for ArecordMicrophone {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ArecordMicrophone {
    pub fn new(device: Option<String>) -> Self {
        let (tx, _) = broadcast::channel(FRAME_BACKLOG);
        Self {
            device,
            tx,
            meter: LevelMeter::new(),
            running: Mutex::new(None),
        }
    }

    fn capture_args(&self) -> Vec<String> {
        let mut args = vec![
            "-q".to_string(),
            "-f".to_string(),
            "S16_LE".to_string(),
            "-r".to_string(),
            CAPTURE_SAMPLE_RATE.to_string(),
            "-c".to_string(),
            "1".to_string(),
            "-t".to_string(),
            "raw".to_string(),
        ];
        if let Some(device) = &self.device {
            args.push("-D".to_string());
            args.push(device.clone());
        }
        args
    }
}

#[async_trait]
impl Microphone for ArecordMicrophone {
    async fn request_access(&self) -> VoiceResult<()> {
        let output = Command::new("arecord")
            .arg("-l")
            .output()
            .await
            .map_err(|e| VoiceError::PermissionDenied(format!("arecord unavailable: {}", e)))?;

        let listing = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() || !listing.contains("card") {
            return Err(VoiceError::PermissionDenied(
                "no capture device available".to_string(),
            ));
        }
        debug!("🎙️ Capture devices:\n{}", listing.trim());
        Ok(())
    }

    fn start(&self) -> VoiceResult<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return Ok(());
        }

        let mut child = Command::new("arecord")
            .args(self.capture_args())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VoiceError::Audio(format!("failed to spawn arecord: {}", e)))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoiceError::Audio("arecord stdout unavailable".to_string()))?;

        let token = CancellationToken::new();
        let cancel = token.clone();
        let tx = self.tx.clone();
        let meter = self.meter.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; CAPTURE_FRAME_SAMPLES * 2];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = stdout.read_exact(&mut buffer) => {
                        match read {
                            Ok(_) => publish(&tx, &meter, pcm_to_samples(&buffer)),
                            Err(e) => {
                                warn!("⚠️ Audio capture ended: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
            let _ = child.kill().await;
            meter.set(0.0);
            debug!("🎙️ Capture task stopped");
        });

        *running = Some(token);
        info!("🎙️ Audio capture started");
        Ok(())
    }

    fn stop(&self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = running.take() {
            token.cancel();
            info!("🎙️ Audio capture stopped");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.tx.subscribe()
    }

    fn level(&self) -> LevelMeter {
        self.meter.clone()
    }
}

#[cfg(feature = "native-audio")]
pub use native::CpalMicrophone;

#[cfg(feature = "native-audio")]
mod native {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Capture through cpal. The stream lives on its own thread because it
    /// is not `Send` on every host.
    pub struct CpalMicrophone {
        device_index: Option<usize>,
        tx: broadcast::Sender<AudioFrame>,
        meter: LevelMeter,
        running: Mutex<Option<Arc<AtomicBool>>>,
    }

    impl CpalMicrophone {
        pub fn new(device_index: Option<usize>) -> Self {
            let (tx, _) = broadcast::channel(FRAME_BACKLOG);
            Self {
                device_index,
                tx,
                meter: LevelMeter::new(),
                running: Mutex::new(None),
            }
        }

        fn select_device(device_index: Option<usize>) -> VoiceResult<cpal::Device> {
            let host = cpal::default_host();
            let device = match device_index {
                Some(idx) => host
                    .input_devices()
                    .map_err(|e| VoiceError::Audio(e.to_string()))?
                    .nth(idx),
                None => host.default_input_device(),
            };
            device.ok_or_else(|| VoiceError::PermissionDenied("no input device".to_string()))
        }
    }

    #[async_trait]
    impl Microphone for CpalMicrophone {
        async fn request_access(&self) -> VoiceResult<()> {
            let device = Self::select_device(self.device_index)?;
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            info!("Using audio device: {}", name);
            Ok(())
        }

        fn start(&self) -> VoiceResult<()> {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            if running.is_some() {
                return Ok(());
            }

            let alive = Arc::new(AtomicBool::new(true));
            let thread_alive = alive.clone();
            let tx = self.tx.clone();
            let meter = self.meter.clone();
            let device_index = self.device_index;

            thread::Builder::new()
                .name("jarvis-capture".to_string())
                .spawn(move || {
                    let device = match Self::select_device(device_index) {
                        Ok(d) => d,
                        Err(e) => {
                            warn!("⚠️ Audio capture unavailable: {}", e);
                            return;
                        }
                    };
                    let config = cpal::StreamConfig {
                        channels: 1,
                        sample_rate: cpal::SampleRate(CAPTURE_SAMPLE_RATE),
                        buffer_size: cpal::BufferSize::Default,
                    };

                    let mut pending: Vec<i16> = Vec::with_capacity(CAPTURE_FRAME_SAMPLES * 2);
                    let stream = device.build_input_stream(
                        &config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            pending.extend_from_slice(data);
                            while pending.len() >= CAPTURE_FRAME_SAMPLES {
                                let frame: Vec<i16> = pending.drain(..CAPTURE_FRAME_SAMPLES).collect();
                                publish(&tx, &meter, frame);
                            }
                        },
                        |err| {
                            warn!("Audio stream error: {}", err);
                        },
                        None,
                    );

                    let stream = match stream {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("⚠️ Failed to build input stream: {}", e);
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        warn!("⚠️ Failed to start input stream: {}", e);
                        return;
                    }

                    while thread_alive.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(50));
                    }
                    drop(stream);
                })?;

            *running = Some(alive);
            info!("🎙️ Audio capture started");
            Ok(())
        }

        fn stop(&self) {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(alive) = running.take() {
                alive.store(false, Ordering::SeqCst);
                self.meter.set(0.0);
                info!("🎙️ Audio capture stopped");
            }
        }

        fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
            self.tx.subscribe()
        }

        fn level(&self) -> LevelMeter {
            self.meter.clone()
        }
    }
}
