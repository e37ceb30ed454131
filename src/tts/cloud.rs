//! Cloud neural synthesis through the Gemini API
//!
//! Requests are gated by a local rate limiter so a chatty session cannot
//! burn through the API quota; a rejected request falls through to the
//! next engine in the chain.

use super::{Rendered, TtsEngine, VoiceParams};
use crate::audio::AudioClip;
use crate::error::SynthesisFault;
use async_trait::async_trait;
use base64::Engine as _;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sample rate of the PCM the API returns
pub const CLOUD_SAMPLE_RATE: u32 = 24000;

pub type SharedLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a rate limiter with the given requests-per-minute burst capacity
pub fn create_limiter(requests_per_minute: u32) -> SharedLimiter {
    let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(rpm)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

pub struct CloudEngine {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    voice: String,
    limiter: SharedLimiter,
}

impl std::fmt::Debug for CloudEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudEngine")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .finish()
    }
}

impl CloudEngine {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, voice: impl Into<String>, limiter: SharedLimiter) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: API_BASE.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            limiter,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": self.voice }
                    }
                }
            }
        })
    }
}

/// Pull the PCM payload out of a generateContent response
fn decode_audio(body: &str) -> Result<AudioClip, SynthesisFault> {
    let response: GenerateResponse =
        serde_json::from_str(body).map_err(|e| SynthesisFault::Failed(format!("bad response: {}", e)))?;

    let inline = response
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .find_map(|p| p.inline_data)
        .ok_or_else(|| SynthesisFault::Failed("response carried no audio".to_string()))?;

    let pcm = base64::engine::general_purpose::STANDARD
        .decode(inline.data.as_bytes())
        .map_err(|e| SynthesisFault::Failed(format!("bad audio payload: {}", e)))?;
    debug!(mime = %inline.mime_type, bytes = pcm.len(), "decoded cloud audio");

    let clip = AudioClip::from_pcm_le(&pcm, CLOUD_SAMPLE_RATE);
    if clip.is_empty() {
        return Err(SynthesisFault::Failed("empty audio payload".to_string()));
    }
    Ok(clip)
}

#[async_trait]
impl TtsEngine for CloudEngine {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn synthesize(&self, text: &str, _params: &VoiceParams) -> Result<Rendered, SynthesisFault> {
        if self.api_key.is_empty() {
            return Err(SynthesisFault::Unavailable("no Gemini API key configured".to_string()));
        }
        if self.limiter.check().is_err() {
            warn!("⏳ Cloud synthesis rate limit reached");
            return Err(SynthesisFault::RateLimited);
        }

        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.api_base, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(text))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| SynthesisFault::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("⏳ Cloud synthesis rejected with 429");
            return Err(SynthesisFault::RateLimited);
        }
        let body = response
            .text()
            .await
            .map_err(|e| SynthesisFault::Failed(e.to_string()))?;
        if !status.is_success() {
            return Err(SynthesisFault::Failed(format!("Gemini API error ({}): {}", status, body)));
        }

        decode_audio(&body).map(Rendered::Audio)
    }
}
