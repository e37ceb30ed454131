//! Piper TTS backend calling a locally hosted synthesis server
//!
//! The server answers `GET /health` and `POST /tts` with a WAV body. If it
//! is down, the engine launches it once, waits out its startup and probes
//! again before giving up for this utterance.

use super::{Rendered, TtsEngine, VoiceParams};
use crate::audio::AudioClip;
use crate::error::SynthesisFault;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, info, warn};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
const SYNTH_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    speaker_id: u32,
    length_scale: f32,
    noise_scale: f32,
    noise_w: f32,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug)]
pub struct PiperEngine {
    client: reqwest::Client,
    base_url: String,
    launch_command: Vec<String>,
    startup_grace: Duration,
    server: Mutex<Option<Child>>,
}

impl PiperEngine {
    pub fn new(base_url: impl Into<String>, launch_command: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            launch_command,
            startup_grace: Duration::from_secs(3),
            server: Mutex::new(None),
        }
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Health check - verify the server is reachable
    pub async fn probe(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => resp
                .json::<HealthResponse>()
                .await
                .map(|h| h.status == "ok")
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Spawn the server unless one we started is still alive. Returns false
    /// if nothing was launched.
    fn launch(&self) -> Result<bool, SynthesisFault> {
        let mut server = self.server.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(child) = server.as_mut() {
            match child.try_wait() {
                Ok(None) => return Ok(false),
                Ok(Some(status)) => warn!("⚠️ Piper server exited ({})", status),
                Err(e) => warn!("⚠️ Piper server state unknown: {}", e),
            }
        }

        let (program, args) = self
            .launch_command
            .split_first()
            .ok_or_else(|| SynthesisFault::Unavailable("no Piper launch command configured".to_string()))?;

        info!("🚀 Starting Piper server: {} {}", program, args.join(" "));
        let child = Command::new(program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SynthesisFault::Unavailable(format!("failed to launch Piper server: {}", e)))?;
        *server = Some(child);
        Ok(true)
    }

    async fn ensure_running(&self) -> Result<(), SynthesisFault> {
        if self.probe().await {
            return Ok(());
        }
        if !self.launch()? {
            return Err(SynthesisFault::Unavailable(
                "Piper server is not answering".to_string(),
            ));
        }

        tokio::time::sleep(self.startup_grace).await;
        let strategy = FixedInterval::from_millis(500).take(3);
        Retry::spawn(strategy, || async {
            if self.probe().await {
                Ok(())
            } else {
                Err(())
            }
        })
        .await
        .map_err(|_| SynthesisFault::Unavailable("Piper server did not come up".to_string()))?;

        info!("✅ Piper server is up");
        Ok(())
    }
}

#[async_trait]
impl TtsEngine for PiperEngine {
    fn name(&self) -> &str {
        "piper"
    }

    async fn synthesize(&self, text: &str, params: &VoiceParams) -> Result<Rendered, SynthesisFault> {
        self.ensure_running().await?;

        let request = TtsRequest {
            text,
            speaker_id: 0,
            length_scale: 1.0 / params.rate.max(0.1),
            noise_scale: 0.667,
            noise_w: 0.8,
        };
        let response = self
            .client
            .post(format!("{}/tts", self.base_url))
            .json(&request)
            .timeout(SYNTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| SynthesisFault::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisFault::Failed(format!("Piper error ({}): {}", status, body)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthesisFault::Failed(e.to_string()))?;
        let clip = AudioClip::from_wav_bytes(&bytes).map_err(|e| SynthesisFault::Failed(e.to_string()))?;
        debug!("📢 Piper rendered {}ms of audio", clip.duration().as_millis());
        Ok(Rendered::Audio(clip))
    }
}
