//! Event buffer observer protocol.
//!
//! A listener is consulted at every lifecycle point of the [`EventBuffer`].
//! The buffer always runs its own bookkeeping after the installed listener,
//! so replacing the listener never disables transmit triggering.
//!
//! Overflow, eviction, size-exceeded and flush callbacks run while the
//! buffer's lock is held. Implementations must not call back into the same
//! buffer from those callbacks.

use std::sync::Mutex;

use crate::buffer::EventBuffer;
use crate::event::Event;

/// Observer of event buffer activity. Every method has a pass-through default.
pub trait EventListener: Send + Sync {
    /// An event is about to be queued. Return `false` to reject it.
    fn on_event_added(&self, _event: &mut Event) -> bool {
        true
    }

    /// The buffer is full. Return `true` to drop the incoming event outright.
    fn on_event_overflow(&self, _event: &Event) -> bool {
        false
    }

    /// `event` was chosen for eviction. Return `false` to keep it.
    fn on_event_evicted(&self, _event: &Event) -> bool {
        true
    }

    /// The buffer reached capacity; `current_size` is its size before insertion.
    fn on_event_queue_size_exceeded(&self, _current_size: usize) {}

    /// The oldest buffered event is older than `max_buffer_time_secs`.
    fn on_event_queue_time_exceeded(&self, _max_buffer_time_secs: u64) {}

    /// The buffer contents were claimed by a snapshot.
    fn on_event_flush(&self) {}

    fn on_start(&self, _buffer: &EventBuffer) {}

    fn on_shutdown(&self) {}
}

/// A listener that accepts everything and observes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl EventListener for NoopListener {}

/// Callback names recorded by [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerCall {
    Added(String),
    Overflow(String),
    Evicted(String),
    SizeExceeded(usize),
    TimeExceeded(u64),
    Flush,
    Start,
    Shutdown,
}

/// Records every callback it receives and answers with configurable verdicts.
///
/// Useful for asserting the order of buffer notifications.
#[derive(Debug)]
pub struct RecordingListener {
    calls: Mutex<Vec<ListenerCall>>,
    accept_added: bool,
    drop_on_overflow: bool,
    allow_eviction: bool,
}

impl Default for RecordingListener {
    fn default() -> Self {
        Self::new(true, false, true)
    }
}

impl RecordingListener {
    pub fn new(accept_added: bool, drop_on_overflow: bool, allow_eviction: bool) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            accept_added,
            drop_on_overflow,
            allow_eviction,
        }
    }

    pub fn calls(&self) -> Vec<ListenerCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: ListenerCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

fn label(event: &Event) -> String {
    event.name().unwrap_or_default().to_string()
}

impl EventListener for RecordingListener {
    fn on_event_added(&self, event: &mut Event) -> bool {
        self.record(ListenerCall::Added(label(event)));
        self.accept_added
    }

    fn on_event_overflow(&self, event: &Event) -> bool {
        self.record(ListenerCall::Overflow(label(event)));
        self.drop_on_overflow
    }

    fn on_event_evicted(&self, event: &Event) -> bool {
        self.record(ListenerCall::Evicted(label(event)));
        self.allow_eviction
    }

    fn on_event_queue_size_exceeded(&self, current_size: usize) {
        self.record(ListenerCall::SizeExceeded(current_size));
    }

    fn on_event_queue_time_exceeded(&self, max_buffer_time_secs: u64) {
        self.record(ListenerCall::TimeExceeded(max_buffer_time_secs));
    }

    fn on_event_flush(&self) {
        self.record(ListenerCall::Flush);
    }

    fn on_start(&self, _buffer: &EventBuffer) {
        self.record(ListenerCall::Start);
    }

    fn on_shutdown(&self) {
        self.record(ListenerCall::Shutdown);
    }
}
