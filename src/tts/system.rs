//! Platform synthesis through espeak-ng or speech-dispatcher

use super::{Rendered, TtsEngine, VoiceParams};
use crate::error::SynthesisFault;
use async_trait::async_trait;
use std::io::ErrorKind;
use tokio::process::Command;
use tracing::debug;

/// espeak-ng speed at rate 1.0, in words per minute
const BASE_WPM: f32 = 175.0;

#[derive(Debug, Default)]
pub struct SystemEngine;

impl SystemEngine {
    pub fn new() -> Self {
        Self
    }

    fn espeak_args(text: &str, params: &VoiceParams) -> Vec<String> {
        let wpm = (BASE_WPM * params.rate).round().clamp(80.0, 450.0) as u32;
        let pitch = (50.0 * params.pitch).round().clamp(0.0, 99.0) as u32;
        vec![
            "-v".to_string(),
            params.voice.clone(),
            "-s".to_string(),
            wpm.to_string(),
            "-p".to_string(),
            pitch.to_string(),
            "--".to_string(),
            text.to_string(),
        ]
    }

    fn spd_say_args(text: &str, params: &VoiceParams) -> Vec<String> {
        let rate = ((params.rate - 1.0) * 100.0).round().clamp(-100.0, 100.0) as i32;
        let pitch = ((params.pitch - 1.0) * 100.0).round().clamp(-100.0, 100.0) as i32;
        let language = params.voice.split('-').next().unwrap_or("en").to_string();
        vec![
            "-w".to_string(),
            "-l".to_string(),
            language,
            "-r".to_string(),
            rate.to_string(),
            "-p".to_string(),
            pitch.to_string(),
            "--".to_string(),
            text.to_string(),
        ]
    }

    /// Run a synthesis command to completion. `Ok(None)` if the program is
    /// not installed.
    async fn run(program: &str, args: &[String]) -> Result<Option<()>, SynthesisFault> {
        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SynthesisFault::Failed(format!("{}: {}", program, e))),
        };

        let status = child
            .wait()
            .await
            .map_err(|e| SynthesisFault::Failed(format!("{}: {}", program, e)))?;
        if status.success() {
            Ok(Some(()))
        } else {
            Err(SynthesisFault::Failed(format!("{} exited with {}", program, status)))
        }
    }
}

#[async_trait]
impl TtsEngine for SystemEngine {
    fn name(&self) -> &str {
        "system"
    }

    fn self_playing(&self) -> bool {
        true
    }

    async fn synthesize(&self, text: &str, params: &VoiceParams) -> Result<Rendered, SynthesisFault> {
        debug!("System speaking: {}", text);

        if Self::run("espeak-ng", &Self::espeak_args(text, params)).await?.is_some() {
            return Ok(Rendered::Spoken);
        }

        if Self::run("spd-say", &Self::spd_say_args(text, params)).await?.is_some() {
            return Ok(Rendered::Spoken);
        }

        Err(SynthesisFault::Unavailable(
            "No system TTS command found (tried espeak-ng, spd-say)".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prosody_mapping() {
        let params = VoiceParams {
            voice: "en-gb".to_string(),
            rate: 2.0,
            pitch: 0.5,
        };
        let args = SystemEngine::espeak_args("hello", &params);
        assert_eq!(args[..6], ["-v", "en-gb", "-s", "350", "-p", "25"]);
        assert_eq!(args.last().map(String::as_str), Some("hello"));

        let args = SystemEngine::spd_say_args("hello", &params);
        assert_eq!(args[..7], ["-w", "-l", "en", "-r", "100", "-p", "-50"]);
    }
}
