//! SQLite-backed attribute and event stores.
//!
//! Both stores share one [`Database`] and implement the persistence
//! contracts of `beacon-core`, so an `AttributeRegistry` can be pointed at
//! them directly.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::{debug, warn};
use uuid::Uuid;

use beacon_core::attribute::{Attribute, AttributeValue};
use beacon_core::error::{BeaconError, Result};
use beacon_core::event::Event;
use beacon_core::store::{AttributeStore, EventStore};

use crate::db::Database;

/// Durable store for persistent user attributes.
pub struct SqliteAttributeStore {
    db: Arc<Database>,
}

impl SqliteAttributeStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Find a stored attribute by name.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Attribute>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name, value_kind, string_value, double_value, bool_value, persistent
                     FROM attributes WHERE name = ?1",
                )
                .map_err(|e| BeaconError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![name], |row| Ok(row_to_attribute(row)))
                .optional()
                .map_err(|e| BeaconError::Storage(e.to_string()))?;

            match result {
                Some(attribute) => Ok(Some(attribute?)),
                None => Ok(None),
            }
        })
    }
}

impl AttributeStore for SqliteAttributeStore {
    fn store(&self, attribute: &Attribute) -> Result<()> {
        let (string_value, double_value, bool_value) = match attribute.value() {
            AttributeValue::String(s) => (Some(s.as_str()), None, None),
            AttributeValue::Double(d) => (None, Some(*d), None),
            AttributeValue::Bool(b) => (None, None, Some(*b as i32)),
            AttributeValue::Void => {
                return Err(BeaconError::Validation(format!(
                    "attribute has no value: {}",
                    attribute.name()
                )))
            }
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO attributes
                 (name, value_kind, string_value, double_value, bool_value, persistent, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    attribute.name(),
                    attribute.value().kind(),
                    string_value,
                    double_value,
                    bool_value,
                    attribute.is_persistent() as i32,
                    Utc::now().timestamp_millis(),
                ],
            )
            .map_err(|e| BeaconError::Storage(format!("Failed to store attribute: {}", e)))?;
            debug!(name = attribute.name(), "Attribute stored");
            Ok(())
        })
    }

    fn fetch_all(&self) -> Result<Vec<Attribute>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name, value_kind, string_value, double_value, bool_value, persistent
                     FROM attributes ORDER BY name ASC",
                )
                .map_err(|e| BeaconError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| Ok(row_to_attribute(row)))
                .map_err(|e| BeaconError::Storage(e.to_string()))?;

            let mut attributes = Vec::new();
            for row in rows {
                match row.map_err(|e| BeaconError::Storage(e.to_string()))? {
                    Ok(attribute) => attributes.push(attribute),
                    Err(e) => warn!(error = %e, "Skipping unreadable stored attribute"),
                }
            }
            Ok(attributes)
        })
    }

    fn count(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM attributes", [], |row| row.get(0))
                .map_err(|e| BeaconError::Storage(e.to_string()))?;
            Ok(count as usize)
        })
    }

    fn clear(&self) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM attributes", [])
                .map_err(|e| BeaconError::Storage(format!("Failed to clear attributes: {}", e)))?;
            Ok(())
        })
    }

    fn delete(&self, attribute: &Attribute) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM attributes WHERE name = ?1",
                rusqlite::params![attribute.name()],
            )
            .map_err(|e| BeaconError::Storage(format!("Failed to delete attribute: {}", e)))?;
            Ok(())
        })
    }
}

/// Durable store for events awaiting harvest.
pub struct SqliteEventStore {
    db: Arc<Database>,
}

impl SqliteEventStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Find a stored event by id.
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Event>> {
        self.db.with_conn(|conn| {
            let payload: Option<String> = conn
                .query_row(
                    "SELECT payload FROM events WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| BeaconError::Storage(e.to_string()))?;

            payload
                .map(|payload| Event::from_json_str(id, &payload))
                .transpose()
        })
    }
}

impl EventStore for SqliteEventStore {
    fn store(&self, event: &Event) -> Result<()> {
        let payload = event.to_json_string()?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO events (id, timestamp, payload, stored_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    event.id().to_string(),
                    event.timestamp(),
                    payload,
                    Utc::now().timestamp_millis(),
                ],
            )
            .map_err(|e| BeaconError::Storage(format!("Failed to store event: {}", e)))?;
            Ok(())
        })
    }

    /// Oldest first. Rows that cannot be decoded are skipped.
    fn fetch_all(&self) -> Result<Vec<Event>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, payload FROM events ORDER BY timestamp ASC")
                .map_err(|e| BeaconError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|e| BeaconError::Storage(e.to_string()))?;

            let mut events = Vec::new();
            for row in rows {
                let (id, payload) = row.map_err(|e| BeaconError::Storage(e.to_string()))?;
                let decoded = Uuid::parse_str(&id)
                    .map_err(|e| BeaconError::Storage(format!("Invalid UUID: {}", e)))
                    .and_then(|id| Event::from_json_str(id, &payload));
                match decoded {
                    Ok(event) => events.push(event),
                    Err(e) => warn!(id = id.as_str(), error = %e, "Skipping unreadable stored event"),
                }
            }
            Ok(events)
        })
    }

    fn count(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
                .map_err(|e| BeaconError::Storage(e.to_string()))?;
            Ok(count as usize)
        })
    }

    fn clear(&self) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM events", [])
                .map_err(|e| BeaconError::Storage(format!("Failed to clear events: {}", e)))?;
            Ok(())
        })
    }

    fn delete(&self, event: &Event) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM events WHERE id = ?1",
                rusqlite::params![event.id().to_string()],
            )
            .map_err(|e| BeaconError::Storage(format!("Failed to delete event: {}", e)))?;
            Ok(())
        })
    }
}

// ============================================================================
// Helper functions for row-to-entity conversion.
// ============================================================================

fn row_to_attribute(row: &rusqlite::Row<'_>) -> Result<Attribute> {
    let name: String = row
        .get(0)
        .map_err(|e| BeaconError::Storage(e.to_string()))?;
    let kind: String = row
        .get(1)
        .map_err(|e| BeaconError::Storage(e.to_string()))?;
    let string_value: Option<String> = row
        .get(2)
        .map_err(|e| BeaconError::Storage(e.to_string()))?;
    let double_value: Option<f64> = row
        .get(3)
        .map_err(|e| BeaconError::Storage(e.to_string()))?;
    let bool_value: Option<i32> = row
        .get(4)
        .map_err(|e| BeaconError::Storage(e.to_string()))?;
    let persistent: i32 = row
        .get(5)
        .map_err(|e| BeaconError::Storage(e.to_string()))?;

    let value = match (kind.as_str(), string_value, double_value, bool_value) {
        ("string", Some(s), _, _) => AttributeValue::String(s),
        ("double", _, Some(d), _) => AttributeValue::Double(d),
        ("bool", _, _, Some(b)) => AttributeValue::Bool(b != 0),
        _ => {
            return Err(BeaconError::Storage(format!(
                "Attribute {} has no {} value",
                name, kind
            )))
        }
    };

    Ok(Attribute::with_persistence(name, value, persistent != 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::event::EventCategory;

    fn make_db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    fn make_event(name: &str, timestamp: i64) -> Event {
        Event::with_timestamp(
            Some(name),
            Some(EventCategory::Custom),
            Some("Purchase"),
            timestamp,
            &[
                Attribute::transient("sku", "A-1"),
                Attribute::transient("total", 19.99),
                Attribute::transient("gift", true),
            ],
        )
    }

    #[test]
    fn test_attribute_store_and_fetch() {
        let store = SqliteAttributeStore::new(make_db());
        store.store(&Attribute::new("plan", "pro")).unwrap();
        store.store(&Attribute::new("seats", 3)).unwrap();
        store.store(&Attribute::new("trial", false)).unwrap();

        let all = store.fetch_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].name(), "plan");
        assert_eq!(all[0].string_value(), Some("pro"));
        assert_eq!(all[1].double_value(), Some(3.0));
        assert_eq!(all[2].bool_value(), Some(false));
        assert!(all.iter().all(Attribute::is_persistent));
    }

    #[test]
    fn test_attribute_store_replaces_by_name() {
        let store = SqliteAttributeStore::new(make_db());
        store.store(&Attribute::new("plan", "free")).unwrap();
        store.store(&Attribute::new("plan", 2)).unwrap();
        assert_eq!(store.count().unwrap(), 1);

        let plan = store.find_by_name("plan").unwrap().unwrap();
        assert_eq!(plan.double_value(), Some(2.0));
        assert!(store.find_by_name("missing").unwrap().is_none());
    }

    #[test]
    fn test_attribute_delete_and_clear() {
        let store = SqliteAttributeStore::new(make_db());
        store.store(&Attribute::new("a", 1)).unwrap();
        store.store(&Attribute::new("b", 2)).unwrap();

        store.delete(&Attribute::new("a", 0)).unwrap();
        assert_eq!(store.count().unwrap(), 1);

        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_void_attribute_rejected() {
        let store = SqliteAttributeStore::new(make_db());
        let result = store.store(&Attribute::new("empty", AttributeValue::Void));
        assert!(matches!(result, Err(BeaconError::Validation(_))));
    }

    #[test]
    fn test_attributes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beacon.db");
        {
            let store = SqliteAttributeStore::new(Arc::new(Database::new(&path).unwrap()));
            store.store(&Attribute::new("plan", "pro")).unwrap();
        }
        let store = SqliteAttributeStore::new(Arc::new(Database::new(&path).unwrap()));
        assert_eq!(
            store.find_by_name("plan").unwrap().unwrap().string_value(),
            Some("pro")
        );
    }

    #[test]
    fn test_event_store_round_trip() {
        let store = SqliteEventStore::new(make_db());
        let event = make_event("order", 1_700_000_000_000);
        store.store(&event).unwrap();

        let found = store.find_by_id(event.id()).unwrap().unwrap();
        assert_eq!(found.id(), event.id());
        assert_eq!(found.name(), Some("order"));
        assert_eq!(found.event_type(), "Purchase");
        assert_eq!(found.category(), EventCategory::Custom);
        assert_eq!(found.timestamp(), 1_700_000_000_000);
        assert_eq!(found.attribute("sku").unwrap().string_value(), Some("A-1"));
        assert_eq!(found.attribute("gift").unwrap().bool_value(), Some(true));

        assert!(store.find_by_id(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_event_store_orders_by_timestamp() {
        let store = SqliteEventStore::new(make_db());
        let late = make_event("late", 2_000);
        let early = make_event("early", 1_000);
        store.store(&late).unwrap();
        store.store(&early).unwrap();
        store.store(&early).unwrap();
        assert_eq!(store.count().unwrap(), 2);

        let names: Vec<String> = store
            .fetch_all()
            .unwrap()
            .iter()
            .map(|e| e.name().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["early", "late"]);

        store.delete(&early).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_unreadable_event_is_skipped() {
        let db = make_db();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (id, timestamp, payload, stored_at)
                 VALUES ('not-a-uuid', 1, '{}', 1)",
                [],
            )
            .map_err(|e| BeaconError::Storage(e.to_string()))?;
            Ok(())
        })
        .unwrap();

        let store = SqliteEventStore::new(db);
        store.store(&make_event("ok", 5)).unwrap();
        let events = store.fetch_all().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), Some("ok"));
    }
}
