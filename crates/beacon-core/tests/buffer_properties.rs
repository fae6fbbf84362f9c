//! Behavioral properties of the event buffer and the attribute registry,
//! exercised through the public API only.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use beacon_core::listener::{ListenerCall, RecordingListener};
use beacon_core::{
    AttributeRegistry, AttributeValue, BeaconConfig, BeaconError, DeviceInformation, DropReason,
    Event, EventBuffer, InMemoryAttributeStore,
};

// =============================================================================
// Helpers
// =============================================================================

fn event(name: &str) -> Event {
    Event::new(Some(name), None, None, &[])
}

fn started(capacity: usize, seed: u64) -> EventBuffer {
    let buffer = EventBuffer::with_limits(capacity, 600).with_seed(seed);
    buffer.initialize();
    buffer
}

fn index_of(event: &Event) -> usize {
    event
        .name()
        .and_then(|n| n.strip_prefix('e'))
        .and_then(|n| n.parse().ok())
        .unwrap()
}

// =============================================================================
// Buffer
// =============================================================================

#[test]
fn test_five_inserts_into_capacity_three() {
    let buffer = started(3, 11);
    for i in 0..5 {
        let _ = buffer.add_event(event(&format!("e{}", i)));
    }
    assert_eq!(buffer.events_recorded(), 5);
    assert_eq!(buffer.events_evicted() + buffer.events_dropped(), 2);
    assert_eq!(buffer.size(), 3);
}

#[test]
fn test_concurrent_producers_conserve_events() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 500;
    const CAPACITY: usize = 64;

    let buffer = Arc::new(started(CAPACITY, 3));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let _ = buffer.add_event(event(&format!("p{}-{}", p, i)));
                }
            })
        })
        .collect();

    let harvester = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut harvested = 0;
            for _ in 0..50 {
                let snapshot = buffer.get_queued_events_snapshot();
                assert!(snapshot.len() <= CAPACITY);
                harvested += snapshot.len();
                thread::yield_now();
            }
            harvested
        })
    };

    for producer in producers {
        producer.join().unwrap();
    }
    let harvested = harvester.join().unwrap() as u64;

    let remaining = buffer.size() as u64;
    assert!(remaining <= CAPACITY as u64);
    assert_eq!(buffer.events_recorded(), (PRODUCERS * PER_PRODUCER) as u64);
    assert_eq!(
        buffer.events_recorded(),
        buffer.events_evicted() + buffer.events_dropped() + harvested + remaining
    );
}

#[test]
fn test_snapshots_never_duplicate_events() {
    let buffer = Arc::new(started(64, 5));
    let producer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            for i in 0..2000 {
                let _ = buffer.add_event(event(&format!("e{}", i)));
            }
        })
    };

    let mut seen = std::collections::HashSet::new();
    while !producer.is_finished() {
        for e in buffer.get_queued_events_snapshot() {
            assert!(seen.insert(e.id()));
        }
    }
    producer.join().unwrap();
    for e in buffer.get_queued_events_snapshot() {
        assert!(seen.insert(e.id()));
    }
}

#[test]
fn test_eviction_is_unbiased() {
    const CAPACITY: usize = 64;
    const RECORDED: usize = 1024;
    const TRIALS: u64 = 200;
    let quarter = RECORDED / 4;

    let mut first_quarter = 0usize;
    let mut last_quarter = 0usize;
    for seed in 0..TRIALS {
        let buffer = started(CAPACITY, seed);
        for i in 0..RECORDED {
            let _ = buffer.add_event(event(&format!("e{}", i)));
        }
        for e in buffer.queued_events() {
            let index = index_of(&e);
            if index < quarter {
                first_quarter += 1;
            } else if index >= RECORDED - quarter {
                last_quarter += 1;
            }
        }
    }

    // Each event survives with probability 64/1024, so each quarter keeps 16
    // events per trial on average.
    let first_mean = first_quarter as f64 / TRIALS as f64;
    let last_mean = last_quarter as f64 / TRIALS as f64;
    assert!((first_mean - 16.0).abs() < 1.5, "first quarter mean {}", first_mean);
    assert!((last_mean - 16.0).abs() < 1.5, "last quarter mean {}", last_mean);
}

#[test]
fn test_listener_sees_each_stage() {
    let buffer = started(1, 9);
    let listener = Arc::new(RecordingListener::default());
    buffer.set_event_listener(Some(listener.clone()));

    buffer.add_event(event("e0")).unwrap();
    let _ = buffer.add_event(event("e1"));
    let _ = buffer.get_queued_events_snapshot();

    let calls = listener.calls();
    assert_eq!(calls[0], ListenerCall::Added("e0".to_string()));
    assert_eq!(calls[1], ListenerCall::Added("e1".to_string()));
    assert!(matches!(calls[2], ListenerCall::Overflow(_)));
    assert!(calls.contains(&ListenerCall::SizeExceeded(1)));
    assert_eq!(calls.last(), Some(&ListenerCall::Flush));
}

#[test]
fn test_listener_veto_counts_as_dropped() {
    let buffer = started(10, 1);
    buffer.set_event_listener(Some(Arc::new(RecordingListener::new(false, false, true))));
    let err = buffer.add_event(event("e0")).unwrap_err();
    assert!(matches!(
        err,
        BeaconError::EventDropped {
            reason: DropReason::Vetoed
        }
    ));
    assert_eq!(buffer.events_recorded(), 0);
    assert_eq!(buffer.events_dropped(), 1);
}

// =============================================================================
// Registry
// =============================================================================

fn registry() -> Arc<AttributeRegistry> {
    let registry = AttributeRegistry::new(
        BeaconConfig::default(),
        Arc::new(InMemoryAttributeStore::new()),
        Arc::new(DeviceInformation::default()),
    );
    registry.initialize();
    Arc::new(registry)
}

#[test]
fn test_registry_concurrent_attribute_writers_respect_cap() {
    let registry = registry();

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..64 {
                    let _ = registry.set_attribute(&format!("w{}_{}", w, i), i, false);
                    let _ = registry.increment_attribute("shared_counter", 1.0, false);
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(registry.user_attribute_count(), 128);
    let counter = registry.get_attribute("shared_counter");
    // The counter competes with the writers for the last slots.
    if let Some(counter) = counter {
        assert!(counter.double_value().unwrap() >= 1.0);
    }
}

#[test]
fn test_registry_end_to_end_harvest() {
    let registry = registry();
    registry.set_attribute("plan", "pro", true).unwrap();

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..25 {
                    let mut attributes = HashMap::new();
                    attributes.insert("producer".to_string(), AttributeValue::from(p));
                    attributes.insert("sequence".to_string(), AttributeValue::from(i));
                    registry.record_event("tick", &attributes).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let payload = registry.harvest().unwrap();
    assert_eq!(payload.events.len(), 100);
    assert!(payload
        .events
        .iter()
        .all(|e| e.attribute("timeSinceLoad").is_some()));

    let json: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
    assert_eq!(json["session_attributes"]["plan"], "pro");
    assert_eq!(json["events"].as_array().unwrap().len(), 100);
}
