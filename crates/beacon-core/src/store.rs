//! Persistence contracts for attributes and events.
//!
//! The registry only talks to these traits. In-memory implementations live
//! here; durable ones are provided by `beacon-storage`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::attribute::Attribute;
use crate::error::Result;
use crate::event::Event;

/// Storage for persistent user attributes, keyed by attribute name.
pub trait AttributeStore: Send + Sync {
    /// Insert or replace the attribute with this name.
    fn store(&self, attribute: &Attribute) -> Result<()>;
    fn fetch_all(&self) -> Result<Vec<Attribute>>;
    fn count(&self) -> Result<usize>;
    fn clear(&self) -> Result<()>;
    fn delete(&self, attribute: &Attribute) -> Result<()>;
}

/// Storage for buffered events awaiting harvest, keyed by event id.
pub trait EventStore: Send + Sync {
    fn store(&self, event: &Event) -> Result<()>;
    fn fetch_all(&self) -> Result<Vec<Event>>;
    fn count(&self) -> Result<usize>;
    fn clear(&self) -> Result<()>;
    fn delete(&self, event: &Event) -> Result<()>;
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Attribute store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryAttributeStore {
    attributes: Mutex<Vec<Attribute>>,
}

impl InMemoryAttributeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttributeStore for InMemoryAttributeStore {
    fn store(&self, attribute: &Attribute) -> Result<()> {
        let mut attributes = guard(&self.attributes);
        match attributes.iter_mut().find(|a| a.name() == attribute.name()) {
            Some(existing) => *existing = attribute.clone(),
            None => attributes.push(attribute.clone()),
        }
        Ok(())
    }

    fn fetch_all(&self) -> Result<Vec<Attribute>> {
        Ok(guard(&self.attributes).clone())
    }

    fn count(&self) -> Result<usize> {
        Ok(guard(&self.attributes).len())
    }

    fn clear(&self) -> Result<()> {
        guard(&self.attributes).clear();
        Ok(())
    }

    fn delete(&self, attribute: &Attribute) -> Result<()> {
        guard(&self.attributes).retain(|a| a.name() != attribute.name());
        Ok(())
    }
}

/// Event store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: Mutex<HashMap<Uuid, Event>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryEventStore {
    fn store(&self, event: &Event) -> Result<()> {
        guard(&self.events).insert(event.id(), event.clone());
        Ok(())
    }

    /// Oldest first.
    fn fetch_all(&self) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = guard(&self.events).values().cloned().collect();
        events.sort_by_key(Event::timestamp);
        Ok(events)
    }

    fn count(&self) -> Result<usize> {
        Ok(guard(&self.events).len())
    }

    fn clear(&self) -> Result<()> {
        guard(&self.events).clear();
        Ok(())
    }

    fn delete(&self, event: &Event) -> Result<()> {
        guard(&self.events).remove(&event.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_store_replaces_by_name() {
        let store = InMemoryAttributeStore::new();
        store.store(&Attribute::new("plan", "free")).unwrap();
        store.store(&Attribute::new("plan", "pro")).unwrap();
        store.store(&Attribute::new("seats", 3)).unwrap();
        assert_eq!(store.count().unwrap(), 2);

        let all = store.fetch_all().unwrap();
        let plan = all.iter().find(|a| a.name() == "plan").unwrap();
        assert_eq!(plan.string_value(), Some("pro"));

        store.delete(&Attribute::new("plan", "ignored")).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_event_store_by_id() {
        let store = InMemoryEventStore::new();
        let late = Event::with_timestamp(Some("late"), None, None, 2_000, &[]);
        let early = Event::with_timestamp(Some("early"), None, None, 1_000, &[]);
        store.store(&late).unwrap();
        store.store(&early).unwrap();
        store.store(&early).unwrap();
        assert_eq!(store.count().unwrap(), 2);

        let names: Vec<_> = store
            .fetch_all()
            .unwrap()
            .iter()
            .map(|e| e.name().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["early", "late"]);

        store.delete(&early).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
