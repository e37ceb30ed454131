//! Duplicate command suppression
//!
//! A single utterance can be finalized twice (provider retries, a restart
//! racing a late result). Two layers guard the command callback: an exact
//! text list with a short window and a normalized-hash map with a longer one.

use crate::utils::normalize_text;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Maximum entries in the exact-text list
const MAX_RECENT: usize = 10;

/// Maximum entries in the hash map before oldest-half eviction
const MAX_HASHES: usize = 100;

#[derive(Debug)]
pub struct DuplicateCommandFilter {
    recent: VecDeque<(String, Instant)>,
    hashes: HashMap<u64, Instant>,
    exact_window: Duration,
    hash_window: Duration,
    max_hashes: usize,
}

impl Default for DuplicateCommandFilter {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(5))
    }
}

impl DuplicateCommandFilter {
    pub fn new(exact_window: Duration, hash_window: Duration) -> Self {
        Self {
            recent: VecDeque::new(),
            hashes: HashMap::new(),
            exact_window,
            hash_window,
            max_hashes: MAX_HASHES,
        }
    }

    /// `false` if `text` repeats a command seen inside the dedup window
    pub fn should_process(&self, text: &str, now: Instant) -> bool {
        let exact_repeat = self
            .recent
            .iter()
            .any(|(t, ts)| t == text && now.duration_since(*ts) < self.exact_window);
        if exact_repeat {
            debug!("🔁 Exact duplicate command: '{}'", text);
            return false;
        }

        if let Some(ts) = self.hashes.get(&command_hash(text)) {
            if now.duration_since(*ts) < self.hash_window {
                debug!("🔁 Near-duplicate command: '{}'", text);
                return false;
            }
        }

        true
    }

    /// Remember `text` if it is not already a live duplicate
    pub fn record_if_novel(&mut self, text: &str, now: Instant) {
        if !self.should_process(text, now) {
            return;
        }
        self.prune(now);

        self.recent.push_back((text.to_string(), now));
        while self.recent.len() > MAX_RECENT {
            self.recent.pop_front();
        }

        self.hashes.insert(command_hash(text), now);
        if self.hashes.len() > self.max_hashes {
            self.evict_oldest_half();
        }
    }

    /// Check and record in one step; `true` means dispatch
    pub fn admit(&mut self, text: &str, now: Instant) -> bool {
        if self.should_process(text, now) {
            self.record_if_novel(text, now);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.recent.clear();
        self.hashes.clear();
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        let exact_window = self.exact_window;
        let hash_window = self.hash_window;
        self.recent
            .retain(|(_, ts)| now.duration_since(*ts) < exact_window);
        self.hashes
            .retain(|_, ts| now.duration_since(*ts) < hash_window);
    }

    fn evict_oldest_half(&mut self) {
        let mut entries: Vec<(u64, Instant)> = self.hashes.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by_key(|(_, ts)| *ts);
        let evict = entries.len() / 2;
        for (key, _) in entries.into_iter().take(evict) {
            self.hashes.remove(&key);
        }
        debug!(remaining = self.hashes.len(), "dedup cache evicted oldest half");
    }
}

fn command_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalize_text(text).hash(&mut hasher);
    hasher.finish()
}
