use jarvis_voice::asr::{SttPreference, SttProvider};
use jarvis_voice::error::RecognitionFault;
use jarvis_voice::{ConfigStore, VoiceState};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod common;
use common::mock_tts::MockTts;
use common::{wait_until, Harness};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn test_power_on_prefers_healthy_local_engine() {
    let h = Harness::builder().spawn();
    assert_eq!(h.state(), VoiceState::Muted);

    h.power_on().await;
    assert!(h.mic.is_running());
    assert_eq!(h.local.starts(), 1);
    assert_eq!(h.streaming.starts(), 0);
    assert_eq!(h.snapshot().await.provider, Some(SttProvider::Local));
}

#[tokio::test(start_paused = true)]
async fn test_auto_falls_back_to_streaming() {
    let h = Harness::builder().local_healthy(false).spawn();
    h.power_on().await;
    assert_eq!(h.streaming.starts(), 1);
    assert_eq!(h.local.starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_microphone_denied_goes_to_error() {
    let h = Harness::builder().deny_microphone().spawn();
    h.engine.set_power(true).unwrap();
    assert!(h.wait_for_state(VoiceState::Error).await);
    assert!(!h.mic.is_running());
    assert_eq!(h.local.starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_forced_local_unavailable_goes_to_error() {
    let h = Harness::builder()
        .stt(SttPreference::Local)
        .local_healthy(false)
        .spawn();
    h.engine.set_power(true).unwrap();
    assert!(h.wait_for_state(VoiceState::Error).await);
    assert_eq!(h.streaming.starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_activation_phrase_then_command() {
    let h = Harness::builder().spawn();
    let transcripts = Arc::new(Mutex::new(Vec::new()));
    let seen = transcripts.clone();
    h.engine
        .subscribe_to_transcript(move |t| seen.lock().unwrap().push(t.text.clone()))
        .unwrap();
    h.power_on().await;

    h.local.say("Hey Jarvis");
    assert!(h.wait_for_state(VoiceState::Listening).await);

    h.local.say("What time is it?");
    assert!(h.wait_for_state(VoiceState::Processing).await);
    assert_eq!(h.commands(), vec!["what time is it"]);
    assert_eq!(transcripts.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_phrase_with_command_dispatches_immediately() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    h.local.say("jarvis open the pod bay doors");
    assert!(h.wait_for_state(VoiceState::Processing).await);
    assert_eq!(h.commands(), vec!["open the pod bay doors"]);
}

#[tokio::test(start_paused = true)]
async fn test_misheard_phrase_still_activates() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    h.local.say("jervis turn on the lights");
    assert!(h.wait_for_state(VoiceState::Processing).await);
    assert_eq!(h.commands(), vec!["turn on the lights"]);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_final_dispatches_once() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    h.local.say("jarvis lights on");
    h.local.say("jarvis lights on");
    assert!(wait_until(|| !h.commands().is_empty()).await);
    settle().await;
    assert_eq!(h.commands(), vec!["lights on"]);
}

#[tokio::test(start_paused = true)]
async fn test_transcript_without_phrase_is_ignored() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    h.local.say("what time is it");
    settle().await;
    assert!(h.commands().is_empty());
    assert_eq!(h.state(), VoiceState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_listening_expires_back_to_idle() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    h.local.say("jarvis");
    assert!(h.wait_for_state(VoiceState::Listening).await);

    tokio::time::sleep(Duration::from_secs(14)).await;
    assert_eq!(h.state(), VoiceState::Listening);
    assert!(h.wait_for_state(VoiceState::Idle).await);
}

#[tokio::test(start_paused = true)]
async fn test_processing_expires_back_to_idle() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    h.local.say("jarvis play some music");
    assert!(h.wait_for_state(VoiceState::Processing).await);
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.state(), VoiceState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_silence_finalizes_utterance() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    h.local.say("jarvis");
    assert!(h.wait_for_state(VoiceState::Listening).await);

    h.mic.set_level(0.3);
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.mic.set_level(0.0);
    assert!(wait_until(|| h.local.finalizes() >= 1).await);
}

#[tokio::test(start_paused = true)]
async fn test_speak_returns_to_idle() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    h.engine.speak("Hello there.").unwrap();
    assert!(h.wait_for_state(VoiceState::Speaking).await);
    assert!(h.wait_for_state(VoiceState::Idle).await);
    assert_eq!(h.tts.spoken(), vec!["Hello there."]);
    assert_eq!(h.snapshot().await.handles_in_use, 0);
}

#[tokio::test(start_paused = true)]
async fn test_identical_reply_within_window_plays_once() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    h.engine.speak("It is sunny").unwrap();
    h.engine.speak("It is sunny").unwrap();
    assert!(h.wait_for_state(VoiceState::Speaking).await);
    assert!(h.wait_for_state(VoiceState::Idle).await);
    settle().await;
    assert_eq!(h.tts.calls(), 1);

    tokio::time::sleep(Duration::from_secs(4)).await;
    h.engine.speak("It is sunny").unwrap();
    assert!(wait_until(|| h.tts.calls() == 2).await);
}

#[tokio::test(start_paused = true)]
async fn test_new_reply_cuts_off_the_one_playing() {
    let h = Harness::builder()
        .tts(MockTts::audio(Duration::from_secs(5)))
        .spawn();
    h.power_on().await;

    h.engine.speak("First answer.").unwrap();
    assert!(wait_until(|| h.output.playing() == 1).await);

    h.engine.speak("Second answer.").unwrap();
    assert!(wait_until(|| h.tts.calls() == 2 && h.output.stops() >= 1).await);
    settle().await;
    assert_eq!(h.state(), VoiceState::Speaking);
    assert_eq!(h.output.playing(), 1);
    assert_eq!(h.snapshot().await.handles_in_use, 1);

    assert!(h.wait_for_state(VoiceState::Idle).await);
    assert_eq!(h.tts.spoken(), vec!["First answer.", "Second answer."]);
    assert_eq!(h.output.completed(), 1);
    assert_eq!(h.snapshot().await.handles_in_use, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transcript_right_after_reply_is_dropped() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    h.engine.speak("Done.").unwrap();
    assert!(h.wait_for_state(VoiceState::Speaking).await);
    assert!(h.wait_for_state(VoiceState::Idle).await);

    // Still inside the deaf window after playback
    assert!(h.local.say("jarvis lights on"));
    settle().await;
    assert!(h.commands().is_empty());
    assert_eq!(h.state(), VoiceState::Idle);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(h.local.say("jarvis lights off"));
    assert!(wait_until(|| h.commands() == vec!["lights off"]).await);
}

#[tokio::test(start_paused = true)]
async fn test_speak_while_muted_is_ignored() {
    let h = Harness::builder().spawn();
    h.engine.speak("nobody hears this").unwrap();
    settle().await;
    assert_eq!(h.tts.calls(), 0);
    assert_eq!(h.state(), VoiceState::Muted);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_releases_synthesis_handle() {
    let h = Harness::builder()
        .tts(MockTts::audio(Duration::from_secs(5)))
        .spawn();
    let states = Arc::new(Mutex::new(Vec::new()));
    let seen = states.clone();
    h.engine.subscribe(move |s| seen.lock().unwrap().push(s)).unwrap();
    h.power_on().await;

    h.engine.speak("a very long answer").unwrap();
    assert!(wait_until(|| h.output.playing() == 1).await);
    assert_eq!(h.snapshot().await.handles_in_use, 1);

    h.engine.interrupt().unwrap();
    assert!(h.wait_for_state(VoiceState::Listening).await);
    assert!(wait_until(|| h.output.playing() == 0).await);
    assert!(h.output.stops() >= 1);

    // Only the activity analyser's handle remains in use
    assert_eq!(h.snapshot().await.handles_in_use, 1);

    let states = states.lock().unwrap().clone();
    let tail = &states[states.len() - 3..];
    assert_eq!(
        tail,
        [VoiceState::Speaking, VoiceState::Interrupted, VoiceState::Listening]
    );
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_phrase_ignored_while_audio_plays() {
    let h = Harness::builder()
        .tts(MockTts::audio(Duration::from_secs(5)))
        .spawn();
    h.power_on().await;

    h.engine.speak("a very long answer").unwrap();
    assert!(wait_until(|| h.output.playing() == 1).await);

    h.local.say("stop");
    h.local.say("jarvis do something else");
    settle().await;
    assert_eq!(h.state(), VoiceState::Speaking);
    assert!(h.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_phrase_barges_in_before_audio() {
    let h = Harness::builder()
        .tts(MockTts::audio(Duration::from_secs(5)).with_synth_delay(Duration::from_secs(2)))
        .spawn();
    h.power_on().await;

    h.engine.speak("thinking about it").unwrap();
    assert!(h.wait_for_state(VoiceState::Speaking).await);

    h.local.say("stop");
    assert!(h.wait_for_state(VoiceState::Listening).await);
    assert_eq!(h.output.playing(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_streaming_faults_switch_to_local() {
    let h = Harness::builder().stt(SttPreference::Streaming).spawn();
    h.power_on().await;
    assert_eq!(h.streaming.starts(), 1);

    for n in 1..=3 {
        assert!(wait_until(|| h.streaming.is_listening()).await);
        h.streaming
            .fail(RecognitionFault::Network("connection reset".to_string()));
        if n < 3 {
            assert!(wait_until(|| h.streaming.starts() == n + 1).await);
        }
    }

    assert!(wait_until(|| h.local.starts() == 1).await);
    assert_eq!(h.streaming.starts(), 3);
    assert_eq!(h.snapshot().await.provider, Some(SttProvider::Local));
    assert_eq!(h.state(), VoiceState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_faults_without_fallback_are_terminal() {
    let h = Harness::builder()
        .stt(SttPreference::Streaming)
        .local_healthy(false)
        .spawn();
    h.power_on().await;

    for n in 1..=5 {
        assert!(wait_until(|| h.streaming.is_listening()).await, "session {} never started", n);
        h.streaming
            .fail(RecognitionFault::Network("connection reset".to_string()));
    }

    assert!(h.wait_for_state(VoiceState::Error).await);
    assert!(!h.mic.is_running());
    assert_eq!(h.streaming.starts(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_no_speech_is_absorbed() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    h.local
        .emit(jarvis_voice::asr::RecognizerEvent::Fault(RecognitionFault::NoSpeech));
    settle().await;
    assert_eq!(h.state(), VoiceState::Idle);
    assert_eq!(h.snapshot().await.session.counters.error_count, 0);
    assert_eq!(h.local.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_short_session_storm_forces_cooldown() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    for ended in 1..=4 {
        h.local.end_session();
        assert!(wait_until(|| h.local.starts() == ended + 1).await);
    }

    let fifth = tokio::time::Instant::now();
    h.local.end_session();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(h.local.starts(), 5);

    assert!(wait_until(|| h.local.starts() == 6).await);
    assert!(fifth.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_toggle_mute_power_cycles() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    h.engine.toggle_mute().unwrap();
    assert!(h.wait_for_state(VoiceState::Muted).await);
    assert!(!h.mic.is_running());
    assert!(!h.local.is_listening());

    h.engine.toggle_mute().unwrap();
    assert!(h.wait_for_state(VoiceState::Idle).await);
    assert!(wait_until(|| h.local.starts() == 2).await);
}

#[tokio::test(start_paused = true)]
async fn test_set_config_persists_and_applies() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    let mut config = h.engine.config().await.unwrap();
    config.activation_phrase = "Computer".to_string();
    h.engine.set_config(config).await.unwrap();
    assert_eq!(h.store.load().unwrap().activation_phrase, "computer");

    h.local.say("jarvis dim the lights");
    settle().await;
    assert!(h.commands().is_empty());

    h.local.say("computer dim the lights");
    assert!(wait_until(|| h.commands() == vec!["dim the lights"]).await);
}

#[tokio::test(start_paused = true)]
async fn test_switch_provider_restarts_recognition() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    h.engine
        .switch_stt_provider(SttPreference::Streaming)
        .await
        .unwrap();
    assert!(wait_until(|| h.streaming.is_listening()).await);
    assert!(!h.local.is_listening());
    assert_eq!(h.store.load().unwrap().stt_provider, SttPreference::Streaming);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_serializes() {
    let h = Harness::builder().spawn();
    h.power_on().await;

    let snapshot = h.snapshot().await;
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["session"]["state"], "IDLE");
    assert_eq!(json["provider"], "local");
    assert_eq!(json["synthesis_chain"][0], "mock");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_all_handles() {
    let h = Harness::builder().spawn();
    h.power_on().await;
    h.engine.speak("short").unwrap();
    assert!(h.wait_for_state(VoiceState::Speaking).await);

    h.engine.shutdown().await.unwrap();
    let stats = &h.output.stats;
    assert!(stats.opened.load(Ordering::SeqCst) >= 1);
    assert_eq!(
        stats.closed.load(Ordering::SeqCst),
        stats.opened.load(Ordering::SeqCst)
    );
    assert!(h.engine.speak("again").is_err());
}
