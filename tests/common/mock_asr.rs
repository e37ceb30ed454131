//! Mock Recognizer for Testing
//!
//! Tests push transcripts and faults into whatever session is running.

use async_trait::async_trait;
use jarvis_voice::asr::{AsrEngine, RecognizerEvent, SttProvider};
use jarvis_voice::error::RecognitionFault;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub struct MockAsr {
    provider: SttProvider,
    healthy: AtomicBool,
    session: Mutex<Option<mpsc::UnboundedSender<RecognizerEvent>>>,
    starts: AtomicUsize,
    finalizes: AtomicUsize,
}

impl MockAsr {
    pub fn new(provider: SttProvider, healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            provider,
            healthy: AtomicBool::new(healthy),
            session: Mutex::new(None),
            starts: AtomicUsize::new(0),
            finalizes: AtomicUsize::new(0),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Sessions started so far
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn finalizes(&self) -> usize {
        self.finalizes.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    /// Deliver an event to the running session
    pub fn emit(&self, event: RecognizerEvent) -> bool {
        match self.session.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// A final transcript
    pub fn say(&self, text: &str) -> bool {
        self.emit(RecognizerEvent::Final(text.to_string()))
    }

    /// End the running session cleanly, like a recognizer timing out
    pub fn end_session(&self) {
        if let Some(tx) = self.session.lock().unwrap().take() {
            let _ = tx.send(RecognizerEvent::Ended);
        }
    }

    /// Report a fault and end the session, like a dropped connection
    pub fn fail(&self, fault: RecognitionFault) {
        if let Some(tx) = self.session.lock().unwrap().take() {
            let _ = tx.send(RecognizerEvent::Fault(fault));
            let _ = tx.send(RecognizerEvent::Ended);
        }
    }
}

#[async_trait]
impl AsrEngine for MockAsr {
    fn provider(&self) -> SttProvider {
        self.provider
    }

    fn name(&self) -> &str {
        match self.provider {
            SttProvider::Streaming => "mock-streaming",
            SttProvider::Local => "mock-local",
        }
    }

    async fn probe(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn start(&self, events: mpsc::UnboundedSender<RecognizerEvent>) -> Result<(), RecognitionFault> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.session.lock().unwrap() = Some(events);
        Ok(())
    }

    fn stop(&self) {
        if let Some(tx) = self.session.lock().unwrap().take() {
            let _ = tx.send(RecognizerEvent::Ended);
        }
    }

    fn abort(&self) {
        self.session.lock().unwrap().take();
    }

    fn finalize(&self) {
        self.finalizes.fetch_add(1, Ordering::SeqCst);
    }
}
