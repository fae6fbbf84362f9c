//! Event data model and construction.
//!
//! An [`Event`] is a named, categorized, timestamped set of attributes. Every
//! event seals four synthetic attributes at construction (`name`,
//! `timestamp`, `category`, `eventType`) so the collector can index it
//! without looking at the struct fields.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::attribute::{names, Attribute, AttributeSet, AttributeValue};
use crate::error::{BeaconError, Result};
use crate::validator;

/// Wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// EventCategory
// =============================================================================

/// The closed set of event kinds the agent records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    Session,
    Interaction,
    Crash,
    Custom,
    NetworkRequest,
    RequestError,
    Breadcrumb,
    UserAction,
    ApplicationExit,
}

impl EventCategory {
    pub const ALL: [EventCategory; 9] = [
        EventCategory::Session,
        EventCategory::Interaction,
        EventCategory::Crash,
        EventCategory::Custom,
        EventCategory::NetworkRequest,
        EventCategory::RequestError,
        EventCategory::Breadcrumb,
        EventCategory::UserAction,
        EventCategory::ApplicationExit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Session => "Session",
            EventCategory::Interaction => "Interaction",
            EventCategory::Crash => "Crash",
            EventCategory::Custom => "Custom",
            EventCategory::NetworkRequest => "NetworkRequest",
            EventCategory::RequestError => "RequestError",
            EventCategory::Breadcrumb => "Breadcrumb",
            EventCategory::UserAction => "UserAction",
            EventCategory::ApplicationExit => "ApplicationExit",
        }
    }

    /// Parse a category name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
    }

    /// The event type this kind always carries, or `None` for custom events
    /// whose type is chosen by the caller.
    pub fn fixed_event_type(&self) -> Option<&'static str> {
        match self {
            EventCategory::Custom => None,
            EventCategory::Session | EventCategory::Interaction => {
                Some(validator::DEFAULT_EVENT_TYPE)
            }
            EventCategory::Crash => Some("MobileCrash"),
            EventCategory::NetworkRequest => Some("MobileRequest"),
            EventCategory::RequestError => Some("MobileRequestError"),
            EventCategory::Breadcrumb => Some("MobileBreadcrumb"),
            EventCategory::UserAction => Some("MobileUserAction"),
            EventCategory::ApplicationExit => Some("MobileApplicationExit"),
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Event
// =============================================================================

/// A single telemetry occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: Uuid,
    name: Option<String>,
    category: EventCategory,
    event_type: String,
    timestamp: i64,
    attributes: AttributeSet,
}

impl Event {
    /// Build an event stamped with the current time.
    pub fn new(
        name: Option<&str>,
        category: Option<EventCategory>,
        event_type: Option<&str>,
        initial_attributes: &[Attribute],
    ) -> Self {
        Self::with_timestamp(name, category, event_type, now_millis(), initial_attributes)
    }

    /// Build an event with an explicit epoch-millisecond timestamp.
    ///
    /// Initial attributes with an invalid key name are skipped; the rest are
    /// copied. The four synthetic attributes are then added; `name` only when
    /// the event name itself is valid.
    pub fn with_timestamp(
        name: Option<&str>,
        category: Option<EventCategory>,
        event_type: Option<&str>,
        timestamp: i64,
        initial_attributes: &[Attribute],
    ) -> Self {
        let category = validator::to_valid_category(category);
        let event_type = validator::to_valid_event_type(event_type);

        let mut attributes: AttributeSet = initial_attributes
            .iter()
            .filter(|a| validator::is_valid_key_name(a.name()))
            .cloned()
            .collect();

        if let Some(n) = name {
            if validator::is_valid_event_name(n) {
                attributes.insert(Attribute::transient(names::EVENT_NAME, n));
            }
        }
        attributes.insert(Attribute::transient(
            names::EVENT_TIMESTAMP,
            timestamp as f64,
        ));
        attributes.insert(Attribute::transient(
            names::EVENT_CATEGORY,
            category.as_str(),
        ));
        attributes.insert(Attribute::transient(names::EVENT_TYPE, event_type.as_str()));

        Self {
            id: Uuid::new_v4(),
            name: name.map(str::to_string),
            category,
            event_type,
            timestamp,
            attributes,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn category(&self) -> EventCategory {
        self.category
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Epoch milliseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Mutable access for listeners that rewrite values in place.
    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes.get_mut(name)
    }

    /// Add validated producer attributes. Returns how many were accepted.
    ///
    /// Invalid attributes and names already present are skipped individually.
    pub fn add_attributes<'a, I>(&mut self, attributes: I) -> usize
    where
        I: IntoIterator<Item = &'a Attribute>,
    {
        let mut added = 0;
        for attribute in attributes {
            if !validator::is_valid_attribute(attribute) {
                warn!(
                    name = attribute.name(),
                    "Attribute is invalid and will not be added to the event"
                );
                continue;
            }
            if self.attributes.insert(attribute.clone()) {
                added += 1;
            } else {
                warn!(
                    name = attribute.name(),
                    "Event already contains attribute, skipping"
                );
            }
        }
        added
    }

    /// Add an agent-owned attribute, skipping the reserved-name rules.
    ///
    /// Still refuses a name that is already present.
    pub fn add_internal_attribute(&mut self, attribute: Attribute) -> bool {
        self.attributes.insert(attribute)
    }

    /// A valid name and a valid, non-reserved type.
    pub fn is_valid(&self) -> bool {
        let name_ok = self
            .name
            .as_deref()
            .is_some_and(validator::is_valid_event_name);
        name_ok
            && validator::is_valid_event_type(&self.event_type)
            && !validator::is_reserved_event_type(&self.event_type)
    }

    /// The event as a flat JSON object of its attributes.
    pub fn as_json_object(&self) -> Map<String, Value> {
        self.attributes
            .iter()
            .map(|a| {
                let value = serde_json::to_value(a.value()).unwrap_or(Value::Null);
                (a.name().to_string(), value)
            })
            .collect()
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Rebuild an event from its flat JSON form.
    ///
    /// The synthetic keys are matched ignoring ASCII case; the timestamp may
    /// be a number or a numeric string. Every other entry becomes a
    /// non-persistent attribute. The event receives a fresh id.
    pub fn from_json_object(object: &Map<String, Value>) -> Self {
        let mut name = None;
        let mut category = None;
        let mut event_type = None;
        let mut timestamp = None;
        let mut initial = Vec::with_capacity(object.len());

        for (key, value) in object {
            if key.eq_ignore_ascii_case(names::EVENT_NAME) {
                name = value.as_str().map(str::to_string);
            } else if key.eq_ignore_ascii_case(names::EVENT_CATEGORY) {
                category = value.as_str().and_then(EventCategory::from_name);
            } else if key.eq_ignore_ascii_case(names::EVENT_TYPE) {
                event_type = value.as_str().map(str::to_string);
            } else if key.eq_ignore_ascii_case(names::EVENT_TIMESTAMP) {
                timestamp = parse_timestamp(value);
            } else if let Some(value) = json_to_value(value) {
                initial.push(Attribute::transient(key.as_str(), value));
            }
        }

        Self::with_timestamp(
            name.as_deref(),
            category,
            event_type.as_deref(),
            timestamp.unwrap_or_else(now_millis),
            &initial,
        )
    }

    /// Restore a stored event, keeping its original id.
    pub fn from_json_str(id: Uuid, json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        let object = value.as_object().ok_or_else(|| {
            BeaconError::Serialization(format!("event {} is not a JSON object", id))
        })?;
        let mut event = Self::from_json_object(object);
        event.id = id;
        Ok(event)
    }
}

/// Events serialize as their flat attribute object.
impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.attributes.serialize(serializer)
    }
}

fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(|f| f as i64)),
        _ => None,
    }
}

fn json_to_value(value: &Value) -> Option<AttributeValue> {
    match value {
        Value::String(s) => Some(AttributeValue::String(s.clone())),
        Value::Number(n) => n.as_f64().map(AttributeValue::Double),
        Value::Bool(b) => Some(AttributeValue::Bool(*b)),
        _ => None,
    }
}

// =============================================================================
// EventFactory
// =============================================================================

/// Builds events of a given kind with that kind's mandatory event type.
pub struct EventFactory;

impl EventFactory {
    /// Create an event for `category`.
    ///
    /// `event_type` is honored for custom events only; every other kind
    /// carries its fixed type.
    pub fn create_event(
        name: Option<&str>,
        category: EventCategory,
        event_type: Option<&str>,
        attributes: &[Attribute],
    ) -> Event {
        let event_type = category.fixed_event_type().or(event_type);
        Event::new(name, Some(category), event_type, attributes)
    }
}
