use jarvis_voice::asr::RestartPolicy;
use jarvis_voice::dedup::DuplicateCommandFilter;
use jarvis_voice::engine::is_interrupt_phrase;
use jarvis_voice::tts::split_into_chunks;
use jarvis_voice::wake_word::WakeWordMatcher;
use std::time::Duration;
use tokio::time::Instant;

#[test]
fn test_transcript_flood_fuzz() {
    let matcher = WakeWordMatcher::new("jarvis");

    // Simulate a flood of random garbage text
    let garbage = [
        "asdfghjkl",
        "!!! @@@ ###",
        "1234567890",
        "extremely long string that doesn't mean anything to the system at all but keeps going and going without a single activation word in it",
        "",
        " ",
        "🎙️🎙️🎙️",
    ];

    for text in garbage {
        assert!(!matcher.matches(text), "false activation on {:?}", text);
        assert!(!is_interrupt_phrase(text) || text.contains("stop"));
    }

    for text in ["Jarvis!", "hey, JARVIS", "jar vis what's up", "ok javis"] {
        assert!(matcher.matches(text), "missed activation in {:?}", text);
    }
}

#[test]
fn test_strip_keeps_command_text() {
    let matcher = WakeWordMatcher::new("jarvis");
    assert_eq!(matcher.strip("Hey Jarvis, what's the weather?"), "what's the weather");
    assert_eq!(matcher.strip("okay jarvis"), "");
    assert_eq!(matcher.strip("remind me jarvis to call mum"), "remind me to call mum");
}

#[test]
fn test_command_flood_is_deduplicated() {
    let mut filter = DuplicateCommandFilter::default();
    let start = Instant::now();

    let mut admitted = 0;
    for i in 0..200u64 {
        let now = start + Duration::from_millis(i * 10);
        if filter.admit("turn off the lights", now) {
            admitted += 1;
        }
    }
    // 2 seconds of repeats collapse into one command
    assert_eq!(admitted, 1);

    let later = start + Duration::from_secs(10);
    assert!(filter.admit("turn off the lights", later));
}

#[test]
fn test_backoff_is_monotonic_and_capped() {
    let policy = RestartPolicy::default();

    for network in [false, true] {
        let mut previous = Duration::ZERO;
        for errors in 0..200 {
            let delay = policy.delay(errors, 0, network);
            assert!(delay >= previous, "delay shrank at {} errors", errors);
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
    }
    assert_eq!(policy.delay(u32::MAX, u32::MAX, true), policy.max_delay);
}

#[test]
fn test_long_reply_chunking_fuzz() {
    let sentence = "This sentence is exactly as long as it needs to be. ";
    let reply = sentence.repeat(40);
    let chunks = split_into_chunks(&reply, 150);

    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(chunk.chars().count() <= 150, "oversized chunk: {}", chunk);
        assert!(!chunk.trim().is_empty());
    }

    let one_word = "a".repeat(400);
    for chunk in split_into_chunks(&one_word, 150) {
        assert!(chunk.chars().count() <= 150);
    }
}
