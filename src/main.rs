//! Jarvis Voice - hands-free voice loop for Linux
//!
//! Listens for the activation phrase, prints recognized commands and can
//! read them back through the configured synthesis chain.

use anyhow::Result;
use clap::Parser;
use jarvis_voice::asr::{AsrEngine, SttPreference, WhisperRecognizer};
use jarvis_voice::audio::{Microphone, OutputBackend};
use jarvis_voice::config::{config_path, JsonConfigStore};
use jarvis_voice::tts::cloud::create_limiter;
use jarvis_voice::tts::pipeline::SynthesisEngines;
use jarvis_voice::tts::{CloudEngine, PiperEngine, SystemEngine, TtsEngine, VoiceMode};
use jarvis_voice::{EnginePorts, Timings, VoiceConfig, VoiceEngine, VoiceState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file (defaults to the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transcription provider: streaming, local or auto
    #[arg(long)]
    stt: Option<SttPreference>,

    /// Synthesis mode: system, piper or gemini
    #[arg(long)]
    voice_mode: Option<VoiceMode>,

    /// Audio input device (arecord -D name, or cpal index with native audio)
    #[arg(short, long)]
    device: Option<String>,

    /// Speak this text and exit
    #[arg(long)]
    say: Option<String>,

    /// Read every recognized command back
    #[arg(long)]
    echo: bool,
}

#[cfg(not(feature = "native-audio"))]
fn audio_ports(device: Option<String>) -> (Arc<dyn Microphone>, Arc<dyn OutputBackend>) {
    use jarvis_voice::audio::{ArecordMicrophone, ProcessOutput};
    (
        Arc::new(ArecordMicrophone::new(device)),
        Arc::new(ProcessOutput::default()),
    )
}

#[cfg(feature = "native-audio")]
fn audio_ports(device: Option<String>) -> (Arc<dyn Microphone>, Arc<dyn OutputBackend>) {
    use jarvis_voice::audio::capture::CpalMicrophone;
    use jarvis_voice::audio::engine::RodioOutput;
    let index = device.and_then(|d| d.parse::<usize>().ok());
    (Arc::new(CpalMicrophone::new(index)), Arc::new(RodioOutput))
}

#[cfg(feature = "vosk")]
fn streaming_recognizer(mic: &Arc<dyn Microphone>) -> Option<Arc<dyn AsrEngine>> {
    use jarvis_voice::asr::VoskRecognizer;
    match VoskRecognizer::find_model_path() {
        Some(path) => Some(Arc::new(VoskRecognizer::new(path, mic.clone()))),
        None => {
            warn!("⚠️ No Vosk model found, streaming recognition unavailable");
            None
        }
    }
}

#[cfg(not(feature = "vosk"))]
fn streaming_recognizer(_mic: &Arc<dyn Microphone>) -> Option<Arc<dyn AsrEngine>> {
    None
}

fn synthesis_engines(config: &VoiceConfig) -> SynthesisEngines {
    let services = &config.services;
    let piper: Arc<dyn TtsEngine> = Arc::new(PiperEngine::new(
        services.piper_url.clone(),
        services.piper_launch_command.clone(),
    ));
    let cloud = (!services.gemini_api_key.is_empty()).then(|| {
        Arc::new(CloudEngine::new(
            services.gemini_api_key.clone(),
            services.gemini_model.clone(),
            services.gemini_voice.clone(),
            create_limiter(services.gemini_requests_per_minute),
        )) as Arc<dyn TtsEngine>
    });
    SynthesisEngines {
        system: Arc::new(SystemEngine::new()),
        piper: Some(piper),
        cloud,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("🤖 Jarvis Voice v{} starting...", env!("CARGO_PKG_VERSION"));

    let path = args.config.clone().unwrap_or_else(config_path);
    let mut config = VoiceConfig::load_from(&path)?;
    if let Some(stt) = args.stt {
        config.stt_provider = stt;
    }
    if let Some(mode) = args.voice_mode {
        config.voice_mode = mode;
    }

    let timings = Timings::default();
    let (microphone, output) = audio_ports(args.device.clone());
    let local: Arc<dyn AsrEngine> = Arc::new(WhisperRecognizer::new(
        config.services.whisper_url.clone(),
        config.services.whisper_language.clone(),
        microphone.clone(),
        timings.vad.clone(),
    ));

    let ports = EnginePorts {
        streaming: streaming_recognizer(&microphone),
        local: Some(local),
        synthesis: synthesis_engines(&config),
        microphone,
        output,
        config_store: Arc::new(JsonConfigStore::new(path)),
    };
    let engine = VoiceEngine::spawn(config, timings, ports);

    if let Some(text) = args.say {
        let (tx, mut states) = tokio::sync::mpsc::unbounded_channel();
        engine.subscribe(move |state| {
            let _ = tx.send(state);
        })?;
        engine.set_power(true)?;
        engine.speak(text)?;

        let mut spoke = false;
        while let Some(state) = states.recv().await {
            match state {
                VoiceState::Speaking => spoke = true,
                VoiceState::Error => break,
                _ if spoke => break,
                _ => {}
            }
        }
        engine.shutdown().await?;
        return Ok(());
    }

    engine.subscribe(|state| info!("📡 {}", state))?;
    engine.subscribe_to_transcript(|t| {
        if t.is_final {
            info!("📝 Heard: '{}'", t.text);
        }
    })?;

    let responder = engine.clone();
    let echo = args.echo;
    engine.set_command_callback(move |command| {
        println!("{}", command);
        if echo {
            if let Err(e) = responder.speak(command) {
                warn!("Could not reply: {}", e);
            }
        }
    })?;

    engine.set_power(true)?;
    info!("✅ Jarvis ready - say the activation phrase");

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutting down");
    engine.shutdown().await?;
    Ok(())
}
