//! Bounded pool of reusable audio output contexts
//!
//! Creating an output context is expensive, keeping many open leaks device
//! resources. Released contexts are suspended rather than closed and an idle
//! timer closes them if nobody picks them up again.
//!
//! All bookkeeping happens under one mutex that is never held across an
//! await, so no caller can observe a half-finished acquire or release.

use super::{AudioClip, AudioContext, OutputBackend};
use crate::error::VoiceResult;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Hard cap on live (non-closed) contexts
    pub max_size: usize,
    /// Recovery replenishes toward this many contexts
    pub min_size: usize,
    /// A released context unused for this long is closed
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 3,
            min_size: 2,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HandleState {
    Available,
    InUse,
    Closed,
}

/// Counters for observability. Exhaustion is counted, never raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub created: u64,
    pub closed: u64,
    pub exhausted: u64,
    pub degraded_shares: u64,
}

struct Slot {
    id: u64,
    context: Arc<dyn AudioContext>,
    state: HandleState,
    users: usize,
    idle_epoch: u64,
}

#[derive(Default)]
struct PoolInner {
    slots: Vec<Slot>,
    idle_timers: HashMap<u64, JoinHandle<()>>,
    next_id: u64,
    stats: PoolStats,
}

impl PoolInner {
    fn live(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state != HandleState::Closed)
            .count()
    }

    fn cancel_timer(&mut self, id: u64) {
        if let Some(timer) = self.idle_timers.remove(&id) {
            timer.abort();
        }
    }

    /// Drop closed contexts from the pool and from the idle-timer map
    fn prune_closed(&mut self) {
        let mut pruned = Vec::new();
        self.slots.retain(|slot| {
            let closed = slot.state == HandleState::Closed || slot.context.is_closed();
            if closed {
                pruned.push(slot.id);
            }
            !closed
        });
        for id in pruned {
            self.cancel_timer(id);
            debug!(id, "pruned closed audio context");
        }
    }
}

/// Shared handle to the pool
#[derive(Clone)]
pub struct AudioResourcePool {
    inner: Arc<Mutex<PoolInner>>,
    backend: Arc<dyn OutputBackend>,
    settings: PoolSettings,
}

impl std::fmt::Debug for AudioResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioResourcePool")
            .field("backend", &self.backend.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl AudioResourcePool {
    pub fn new(backend: Arc<dyn OutputBackend>, settings: PoolSettings) -> Self {
        info!(
            "🔊 Audio pool ready (backend: {}, max: {})",
            backend.name(),
            settings.max_size
        );
        Self {
            inner: Arc::new(Mutex::new(PoolInner::default())),
            backend,
            settings,
        }
    }

    /// Borrow a context. Prefers a parked one, then creates under the cap,
    /// then recovers, and finally shares a busy one. `None` only when no
    /// context can be opened at all.
    pub fn acquire(&self) -> Option<AudioLease> {
        let mut inner = self.lock();
        inner.prune_closed();

        if let Some(lease) = self.take_available(&mut inner) {
            return Some(lease);
        }
        if inner.live() < self.settings.max_size {
            if let Some(lease) = self.create_in_use(&mut inner) {
                return Some(lease);
            }
        }

        inner.stats.exhausted += 1;
        warn!(
            live = inner.live(),
            max = self.settings.max_size,
            "⚠️ Audio pool exhausted, attempting recovery"
        );
        self.recover(&mut inner);

        if let Some(lease) = self.take_available(&mut inner) {
            return Some(lease);
        }
        if inner.live() < self.settings.max_size {
            if let Some(lease) = self.create_in_use(&mut inner) {
                return Some(lease);
            }
        }

        self.share_busy(&mut inner)
    }

    /// Return a context to the pool
    pub fn release(&self, lease: AudioLease) {
        drop(lease);
    }

    /// Close every context and cancel every timer
    pub fn teardown(&self) {
        let mut inner = self.lock();
        for (_, timer) in inner.idle_timers.drain() {
            timer.abort();
        }
        let count = inner.slots.len();
        for slot in inner.slots.drain(..) {
            slot.context.close();
        }
        inner.stats.closed += count as u64;
        if count > 0 {
            info!("🔇 Audio pool torn down ({} contexts closed)", count);
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.lock().stats
    }

    /// Contexts that are not closed
    pub fn live_count(&self) -> usize {
        self.lock().live()
    }

    pub fn in_use_count(&self) -> usize {
        self.lock()
            .slots
            .iter()
            .filter(|s| s.state == HandleState::InUse)
            .count()
    }

    pub fn state_of(&self, id: u64) -> Option<HandleState> {
        self.lock()
            .slots
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.state)
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lease(&self, id: u64, context: Arc<dyn AudioContext>, shared: bool) -> AudioLease {
        AudioLease {
            pool: self.clone(),
            id,
            context,
            shared,
        }
    }

    fn take_available(&self, inner: &mut PoolInner) -> Option<AudioLease> {
        let slot = inner
            .slots
            .iter_mut()
            .find(|s| s.state == HandleState::Available && !s.context.is_closed())?;
        slot.state = HandleState::InUse;
        slot.users = 1;
        slot.idle_epoch += 1;
        slot.context.resume();
        let (id, context) = (slot.id, slot.context.clone());
        inner.cancel_timer(id);
        debug!(id, "reusing audio context");
        Some(self.lease(id, context, false))
    }

    fn open_slot(&self, inner: &mut PoolInner, state: HandleState) -> Option<(u64, Arc<dyn AudioContext>)> {
        match self.backend.open() {
            Ok(context) => {
                inner.next_id += 1;
                let id = inner.next_id;
                inner.slots.push(Slot {
                    id,
                    context: context.clone(),
                    state,
                    users: usize::from(state == HandleState::InUse),
                    idle_epoch: 0,
                });
                inner.stats.created += 1;
                debug!(id, live = inner.live(), "created audio context");
                Some((id, context))
            }
            Err(e) => {
                warn!("⚠️ Failed to open audio context: {}", e);
                None
            }
        }
    }

    fn create_in_use(&self, inner: &mut PoolInner) -> Option<AudioLease> {
        let (id, context) = self.open_slot(inner, HandleState::InUse)?;
        Some(self.lease(id, context, false))
    }

    /// Prune closed contexts and replenish toward the minimum
    fn recover(&self, inner: &mut PoolInner) {
        inner.prune_closed();
        while inner.live() < self.settings.min_size.min(self.settings.max_size) {
            if self.open_slot(inner, HandleState::Available).is_none() {
                break;
            }
        }
    }

    fn share_busy(&self, inner: &mut PoolInner) -> Option<AudioLease> {
        let slot = inner
            .slots
            .iter_mut()
            .filter(|s| s.state == HandleState::InUse)
            .min_by_key(|s| s.users)?;
        slot.users += 1;
        let (id, context) = (slot.id, slot.context.clone());
        inner.stats.degraded_shares += 1;
        warn!(id, "⚠️ Audio pool degraded: sharing a running context");
        Some(self.lease(id, context, true))
    }

    fn release_id(&self, id: u64) {
        let mut inner = self.lock();
        let Some(slot) = inner.slots.iter_mut().find(|s| s.id == id) else {
            return;
        };

        slot.users = slot.users.saturating_sub(1);
        if slot.users > 0 {
            return;
        }

        if slot.context.is_closed() {
            slot.state = HandleState::Closed;
            inner.prune_closed();
            return;
        }

        slot.context.stop();
        slot.context.suspend();
        slot.state = HandleState::Available;
        slot.idle_epoch += 1;
        let epoch = slot.idle_epoch;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let weak = Arc::downgrade(&self.inner);
                let idle_timeout = self.settings.idle_timeout;
                let timer = runtime.spawn(async move {
                    tokio::time::sleep(idle_timeout).await;
                    close_if_idle(&weak, id, epoch);
                });
                if let Some(previous) = inner.idle_timers.insert(id, timer) {
                    previous.abort();
                }
                debug!(id, "audio context parked");
            }
            Err(_) => {
                // No runtime to run the idle timer on
                if let Some(slot) = inner.slots.iter_mut().find(|s| s.id == id) {
                    slot.context.close();
                    slot.state = HandleState::Closed;
                }
                inner.stats.closed += 1;
                inner.prune_closed();
            }
        }
    }
}

fn close_if_idle(inner: &Weak<Mutex<PoolInner>>, id: u64, epoch: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
    inner.idle_timers.remove(&id);

    let Some(slot) = inner.slots.iter_mut().find(|s| s.id == id) else {
        return;
    };
    if slot.state != HandleState::Available || slot.idle_epoch != epoch {
        return;
    }

    slot.context.close();
    slot.state = HandleState::Closed;
    inner.stats.closed += 1;
    inner.prune_closed();
    debug!(id, "closed idle audio context");
}

/// A borrowed context; returned to the pool when dropped
pub struct AudioLease {
    pool: AudioResourcePool,
    id: u64,
    context: Arc<dyn AudioContext>,
    shared: bool,
}

impl std::fmt::Debug for AudioLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioLease")
            .field("id", &self.id)
            .field("shared", &self.shared)
            .finish()
    }
}

impl AudioLease {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Borrowed from a busy context because the pool was exhausted
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn context(&self) -> &Arc<dyn AudioContext> {
        &self.context
    }

    pub async fn play(&self, clip: &AudioClip) -> VoiceResult<()> {
        self.context.play(clip).await
    }

    pub fn stop(&self) {
        self.context.stop();
    }
}

impl Drop for AudioLease {
    fn drop(&mut self) {
        self.pool.release_id(self.id);
    }
}
