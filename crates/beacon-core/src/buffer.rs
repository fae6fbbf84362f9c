//! Bounded, thread-safe event buffer.
//!
//! Producers push events from any thread with [`EventBuffer::add_event`]; a
//! harvest cycle polls [`EventBuffer::is_transmit_required`] and claims the
//! contents atomically with [`EventBuffer::get_queued_events_snapshot`].
//!
//! When the buffer is full, incoming events compete for a slot by reservoir
//! sampling over the lifetime number of recorded events, so every recorded
//! event has the same chance of surviving until the next harvest regardless
//! of when it arrived.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BeaconError, DropReason, Result};
use crate::event::{now_millis, Event};
use crate::listener::EventListener;

pub const DEFAULT_MAX_EVENT_POOL_SIZE: usize = 1000;
pub const MIN_EVENT_POOL_SIZE: usize = 64;
pub const DEFAULT_MAX_EVENT_BUFFER_TIME_SECS: u64 = 600;
pub const MIN_EVENT_BUFFER_TIME_SECS: u64 = 60;

/// What a successful insertion changed.
#[derive(Debug, Clone, Default)]
pub struct Insertion {
    /// The event as queued, after the listener ran. Only filled in by
    /// [`EventBuffer::insert`].
    pub queued: Option<Event>,
    /// The buffered event removed to make room.
    pub evicted: Option<Event>,
}

struct BufferState {
    events: Vec<Event>,
    rng: StdRng,
}

/// The event buffer shared by all producers.
pub struct EventBuffer {
    state: Mutex<BufferState>,
    listener: RwLock<Option<Arc<dyn EventListener>>>,
    max_event_pool_size: AtomicUsize,
    max_event_buffer_time_secs: AtomicU64,
    /// Epoch millis of the first insert into an empty buffer, 0 when empty.
    first_insert_millis: AtomicI64,
    initialized: AtomicBool,
    transmit_required: AtomicBool,
    events_recorded: AtomicU64,
    events_evicted: AtomicU64,
    events_dropped: AtomicU64,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBuffer {
    /// Create an uninitialized buffer with the default limits.
    pub fn new() -> Self {
        Self::with_limits(
            DEFAULT_MAX_EVENT_POOL_SIZE,
            DEFAULT_MAX_EVENT_BUFFER_TIME_SECS,
        )
    }

    /// Create an uninitialized buffer with explicit limits.
    ///
    /// Unlike the setters, the limits are taken as given so that small
    /// buffers can be built for tests and simulations.
    pub fn with_limits(max_event_pool_size: usize, max_event_buffer_time_secs: u64) -> Self {
        Self {
            state: Mutex::new(BufferState {
                events: Vec::with_capacity(max_event_pool_size),
                rng: StdRng::from_os_rng(),
            }),
            listener: RwLock::new(None),
            max_event_pool_size: AtomicUsize::new(max_event_pool_size),
            max_event_buffer_time_secs: AtomicU64::new(max_event_buffer_time_secs),
            first_insert_millis: AtomicI64::new(0),
            initialized: AtomicBool::new(false),
            transmit_required: AtomicBool::new(true),
            events_recorded: AtomicU64::new(0),
            events_evicted: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    /// Seed the eviction sampler for reproducible runs.
    pub fn with_seed(self, seed: u64) -> Self {
        self.lock_state().rng = StdRng::seed_from_u64(seed);
        self
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Reset counters, discard buffered events and notify `on_start`.
    ///
    /// Calling this on an initialized buffer does nothing.
    pub fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("Event buffer already initialized, bypassing");
            return;
        }

        self.first_insert_millis.store(0, Ordering::SeqCst);
        self.events_recorded.store(0, Ordering::SeqCst);
        self.events_evicted.store(0, Ordering::SeqCst);
        self.empty();
        // The first harvest after start always transmits.
        self.transmit_required.store(true, Ordering::SeqCst);

        if let Some(listener) = self.listener() {
            listener.on_start(self);
        }
        info!(
            max_event_pool_size = self.max_event_pool_size(),
            max_event_buffer_time_secs = self.max_event_buffer_time(),
            "Event buffer initialized"
        );
    }

    /// Notify `on_shutdown` and stop accepting events.
    ///
    /// Buffered events stay in place for a final harvest.
    pub fn shutdown(&self) {
        if let Some(listener) = self.listener() {
            listener.on_shutdown();
        }
        let remaining = self.size();
        if remaining > 0 {
            warn!(remaining, "Event buffer shut down with events still queued");
        }
        self.transmit_required.store(true, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Listener
    // =========================================================================

    /// Install an outer listener, or pass `None` to restore the bare buffer.
    pub fn set_event_listener(&self, listener: Option<Arc<dyn EventListener>>) {
        let mut slot = self
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = listener;
    }

    pub fn listener(&self) -> Option<Arc<dyn EventListener>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Queue an event.
    ///
    /// Fails with [`BeaconError::EventDropped`] when the buffer is not
    /// initialized, the listener rejects the event, or the buffer is full and
    /// the event loses the sampling draw.
    pub fn add_event(&self, event: Event) -> Result<()> {
        self.push(event, false).map(|_| ())
    }

    /// Queue an event and report what changed: a copy of the event as
    /// queued and the event it evicted, if any.
    ///
    /// Fails exactly like [`EventBuffer::add_event`].
    pub fn insert(&self, event: Event) -> Result<Insertion> {
        self.push(event, true)
    }

    fn push(&self, mut event: Event, keep_copy: bool) -> Result<Insertion> {
        if !self.is_initialized() {
            self.events_dropped.fetch_add(1, Ordering::SeqCst);
            debug!(event_id = %event.id(), "Event buffer not initialized, event dropped");
            return Err(dropped(DropReason::NotInitialized));
        }

        let listener = self.listener();
        if let Some(l) = &listener {
            if !l.on_event_added(&mut event) {
                self.events_dropped.fetch_add(1, Ordering::SeqCst);
                debug!(event_id = %event.id(), "Event rejected by listener");
                return Err(dropped(DropReason::Vetoed));
            }
        }

        if self.is_max_event_buffer_time_exceeded() {
            self.notify_queue_time_exceeded(&listener);
        }

        let mut state = self.lock_state();

        if state.events.is_empty() {
            let now = now_millis();
            self.first_insert_millis.store(now, Ordering::SeqCst);
            debug!(first_insert_millis = now, "Event buffer was empty, stamping first insert");
        }

        let recorded_before = self.events_recorded.fetch_add(1, Ordering::SeqCst);
        let capacity = self.max_event_pool_size();
        let current_size = state.events.len();
        let mut insertion = Insertion::default();

        if current_size >= capacity {
            if self.notify_overflow(&listener, &event) {
                self.events_dropped.fetch_add(1, Ordering::SeqCst);
                return Err(dropped(DropReason::Overflow));
            }

            let index = state.rng.random_range(0..=recorded_before);
            if index >= capacity as u64 {
                let allowed = self.notify_evicted(&listener, &event);
                self.events_dropped.fetch_add(1, Ordering::SeqCst);
                if allowed {
                    self.notify_queue_size_exceeded(&listener, current_size);
                }
                return Err(dropped(DropReason::Sampled));
            }

            let index = index as usize;
            if !self.notify_evicted(&listener, &state.events[index]) {
                self.events_dropped.fetch_add(1, Ordering::SeqCst);
                self.notify_queue_size_exceeded(&listener, current_size);
                return Err(dropped(DropReason::EvictionDeclined));
            }

            insertion.evicted = Some(state.events.remove(index));
            self.events_evicted.fetch_add(1, Ordering::SeqCst);
            self.notify_queue_size_exceeded(&listener, current_size);
        }

        if keep_copy {
            insertion.queued = Some(event.clone());
        }
        state.events.push(event);
        Ok(insertion)
    }

    // =========================================================================
    // Harvest
    // =========================================================================

    /// Whether the harvest cycle should claim the buffer now.
    ///
    /// True when events are left over after shutdown, when a transmit was
    /// requested (the request is consumed), or when a size or age limit is
    /// exceeded.
    pub fn is_transmit_required(&self) -> bool {
        (!self.is_initialized() && self.size() > 0)
            || self
                .transmit_required
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            || self.is_max_event_pool_size_exceeded()
            || self.is_max_event_buffer_time_exceeded()
    }

    /// Request a transmit on the next harvest poll.
    pub fn set_transmit_required(&self) {
        self.transmit_required.store(true, Ordering::SeqCst);
    }

    /// Atomically claim every buffered event, leaving the buffer empty.
    pub fn get_queued_events_snapshot(&self) -> Vec<Event> {
        let mut state = self.lock_state();
        if let Some(listener) = self.listener() {
            listener.on_event_flush();
        }
        self.transmit_required.store(false, Ordering::SeqCst);
        self.first_insert_millis.store(0, Ordering::SeqCst);
        let capacity = self.max_event_pool_size();
        let events = std::mem::replace(&mut state.events, Vec::with_capacity(capacity));
        debug!(count = events.len(), "Event buffer snapshot taken");
        events
    }

    /// Discard every buffered event.
    pub fn empty(&self) {
        let discarded = self.get_queued_events_snapshot();
        if !discarded.is_empty() {
            warn!(count = discarded.len(), "Discarding buffered events");
        }
    }

    /// Remove specific events, typically ones already delivered.
    pub fn remove_events(&self, ids: &[Uuid]) -> usize {
        let mut state = self.lock_state();
        let before = state.events.len();
        state.events.retain(|e| !ids.contains(&e.id()));
        if state.events.is_empty() {
            self.first_insert_millis.store(0, Ordering::SeqCst);
        }
        before - state.events.len()
    }

    /// A copy of the buffered events, oldest first.
    pub fn queued_events(&self) -> Vec<Event> {
        self.lock_state().events.clone()
    }

    pub fn size(&self) -> usize {
        self.lock_state().events.len()
    }

    // =========================================================================
    // Limits
    // =========================================================================

    pub fn max_event_pool_size(&self) -> usize {
        self.max_event_pool_size.load(Ordering::SeqCst)
    }

    /// Set the capacity, clamped to `MIN_EVENT_POOL_SIZE..=DEFAULT_MAX_EVENT_POOL_SIZE`.
    pub fn set_max_event_pool_size(&self, size: usize) {
        let clamped = size.clamp(MIN_EVENT_POOL_SIZE, DEFAULT_MAX_EVENT_POOL_SIZE);
        if clamped != size {
            warn!(
                requested = size,
                applied = clamped,
                "Event pool size out of range, clamping"
            );
        }
        self.max_event_pool_size.store(clamped, Ordering::SeqCst);
    }

    pub fn max_event_buffer_time(&self) -> u64 {
        self.max_event_buffer_time_secs.load(Ordering::SeqCst)
    }

    /// Set the maximum buffer age, clamped to
    /// `MIN_EVENT_BUFFER_TIME_SECS..=DEFAULT_MAX_EVENT_BUFFER_TIME_SECS`.
    pub fn set_max_event_buffer_time(&self, secs: u64) {
        let clamped = secs.clamp(MIN_EVENT_BUFFER_TIME_SECS, DEFAULT_MAX_EVENT_BUFFER_TIME_SECS);
        if clamped != secs {
            warn!(
                requested = secs,
                applied = clamped,
                "Event buffer time out of range, clamping"
            );
        }
        self.max_event_buffer_time_secs.store(clamped, Ordering::SeqCst);
    }

    pub fn is_max_event_pool_size_exceeded(&self) -> bool {
        self.size() > self.max_event_pool_size()
    }

    pub fn is_max_event_buffer_time_exceeded(&self) -> bool {
        let first = self.first_insert_millis.load(Ordering::SeqCst);
        if first <= 0 {
            return false;
        }
        let max_age_millis = self.max_event_buffer_time() as i64 * 1000;
        now_millis() - first > max_age_millis
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Events that reached the insertion critical section since initialize.
    pub fn events_recorded(&self) -> u64 {
        self.events_recorded.load(Ordering::SeqCst)
    }

    pub fn events_evicted(&self) -> u64 {
        self.events_evicted.load(Ordering::SeqCst)
    }

    /// Events refused for any reason. Not reset by initialize.
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn lock_state(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // The installed listener runs first; the buffer's bookkeeping always runs
    // after it. The listener's verdict is final since bookkeeping never vetoes.

    fn notify_overflow(&self, listener: &Option<Arc<dyn EventListener>>, event: &Event) -> bool {
        let drop_event = listener
            .as_ref()
            .is_some_and(|l| l.on_event_overflow(event));
        warn!(event_id = %event.id(), "Event buffer overflow, scheduling transmit");
        self.transmit_required.store(true, Ordering::SeqCst);
        drop_event
    }

    fn notify_evicted(&self, listener: &Option<Arc<dyn EventListener>>, event: &Event) -> bool {
        let allow = listener
            .as_ref()
            .map_or(true, |l| l.on_event_evicted(event));
        debug!(event_id = %event.id(), allow, "Event selected for eviction");
        self.transmit_required.store(true, Ordering::SeqCst);
        allow
    }

    fn notify_queue_size_exceeded(
        &self,
        listener: &Option<Arc<dyn EventListener>>,
        current_size: usize,
    ) {
        if let Some(l) = listener {
            l.on_event_queue_size_exceeded(current_size);
        }
        warn!(
            current_size,
            max_event_pool_size = self.max_event_pool_size(),
            "Event queue size exceeded, scheduling transmit"
        );
        self.transmit_required.store(true, Ordering::SeqCst);
    }

    fn notify_queue_time_exceeded(&self, listener: &Option<Arc<dyn EventListener>>) {
        let max_secs = self.max_event_buffer_time();
        if let Some(l) = listener {
            l.on_event_queue_time_exceeded(max_secs);
        }
        debug!(max_event_buffer_time_secs = max_secs, "Event queue age exceeded, scheduling transmit");
        self.transmit_required.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer")
            .field("size", &self.size())
            .field("max_event_pool_size", &self.max_event_pool_size())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

fn dropped(reason: DropReason) -> BeaconError {
    BeaconError::EventDropped { reason }
}
