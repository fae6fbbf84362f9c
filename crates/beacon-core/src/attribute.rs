//! Attribute data model.
//!
//! An [`Attribute`] is a named value of exactly one kind (string, double or
//! boolean) plus a persistence flag. Attributes are grouped in
//! [`AttributeSet`]s, which are keyed by name: inserting an attribute whose
//! name is already present never creates a duplicate.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::validator;

// =============================================================================
// Well-known attribute names
// =============================================================================

/// Names of the attributes the agent itself stamps on events and sessions.
pub mod names {
    pub const EVENT_NAME: &str = "name";
    pub const EVENT_TIMESTAMP: &str = "timestamp";
    pub const EVENT_CATEGORY: &str = "category";
    pub const EVENT_TYPE: &str = "eventType";
    pub const EVENT_SESSION_ELAPSED_TIME: &str = "timeSinceLoad";

    pub const ACCOUNT_ID: &str = "accountId";
    pub const APP_ID: &str = "appId";
    pub const APP_NAME: &str = "appName";
    pub const UUID: &str = "uuid";
    pub const SESSION_ID: &str = "sessionId";
    pub const SESSION_DURATION: &str = "sessionDuration";
    pub const OS_NAME: &str = "osName";
    pub const OS_VERSION: &str = "osVersion";
    pub const OS_MAJOR_VERSION: &str = "osMajorVersion";
    pub const OS_BUILD: &str = "osBuild";
    pub const DEVICE_MANUFACTURER: &str = "deviceManufacturer";
    pub const DEVICE_MODEL: &str = "deviceModel";
    pub const MEM_USAGE_MB: &str = "memUsageMb";
    pub const CARRIER: &str = "carrier";
    pub const AGENT_VERSION: &str = "newRelicVersion";
    pub const INTERACTION_DURATION: &str = "interactionDuration";
    pub const LAST_INTERACTION: &str = "lastInteraction";
    pub const APP_INSTALL: &str = "install";
    pub const APP_UPGRADE: &str = "upgradeFrom";
    pub const APPLICATION_PLATFORM: &str = "platform";
    pub const APPLICATION_PLATFORM_VERSION: &str = "platformVersion";
    pub const RUNTIME: &str = "runTime";
    pub const ARCHITECTURE: &str = "architecture";
    pub const APP_BUILD: &str = "appBuild";
    pub const PROCESS_ID: &str = "processId";
    pub const OFFLINE: &str = "offline";
    pub const BACKGROUND: &str = "background";

    pub const REQUEST_URL: &str = "requestUrl";
    pub const REQUEST_DOMAIN: &str = "requestDomain";
    pub const REQUEST_PATH: &str = "requestPath";
    pub const REQUEST_METHOD: &str = "requestMethod";
    pub const CONNECTION_TYPE: &str = "connectionType";
    pub const STATUS_CODE: &str = "statusCode";
    pub const BYTES_RECEIVED: &str = "bytesReceived";
    pub const BYTES_SENT: &str = "bytesSent";
    pub const RESPONSE_TIME: &str = "responseTime";
    pub const NETWORK_ERROR_CODE: &str = "networkErrorCode";
    pub const CONTENT_TYPE: &str = "contentType";
    pub const RESPONSE_BODY: &str = "nr.responseBody";
    pub const APP_DATA_HEADER: &str = "nr.X-NewRelic-App-Data";
}

// =============================================================================
// AttributeValue
// =============================================================================

/// The typed payload of an attribute.
///
/// Integers of every width are widened to `Double`, matching how the
/// collector stores numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Double(f64),
    Bool(bool),
    /// No value has been assigned. Never valid for recording.
    #[default]
    Void,
}

impl AttributeValue {
    pub fn is_numeric(&self) -> bool {
        matches!(self, AttributeValue::Double(_))
    }

    /// Name of the value kind, used in diagnostics and storage.
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::String(_) => "string",
            AttributeValue::Double(_) => "double",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Void => "void",
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Double(d) => write!(f, "{}", d),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Void => Ok(()),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<&String> for AttributeValue {
    fn from(value: &String) -> Self {
        AttributeValue::String(value.clone())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Double(value)
    }
}

impl From<f32> for AttributeValue {
    fn from(value: f32) -> Self {
        AttributeValue::Double(f64::from(value))
    }
}

macro_rules! widen_to_double {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for AttributeValue {
                fn from(value: $ty) -> Self {
                    AttributeValue::Double(value as f64)
                }
            }
        )*
    };
}

widen_to_double!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

// =============================================================================
// Attribute
// =============================================================================

/// A named, typed value with a persistence flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    name: String,
    value: AttributeValue,
    persistent: bool,
}

impl Attribute {
    /// Create a persistent attribute.
    pub fn new(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::with_persistence(name, value, true)
    }

    pub fn with_persistence(
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
        persistent: bool,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            persistent,
        }
    }

    /// Create a non-persistent attribute.
    pub fn transient(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::with_persistence(name, value, false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &AttributeValue {
        &self.value
    }

    /// Replace the value. The previous kind is discarded.
    pub fn set_value(&mut self, value: impl Into<AttributeValue>) {
        self.value = value.into();
    }

    /// Whether the attribute should be written to the attribute store.
    ///
    /// Excluded names are never persistent regardless of the flag.
    pub fn is_persistent(&self) -> bool {
        self.persistent && !validator::is_excluded_attribute_name(&self.name)
    }

    pub fn set_persistent(&mut self, persistent: bool) {
        self.persistent = persistent;
    }

    pub fn string_value(&self) -> Option<&str> {
        match &self.value {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn double_value(&self) -> Option<f64> {
        match self.value {
            AttributeValue::Double(d) => Some(d),
            _ => None,
        }
    }

    pub fn bool_value(&self) -> Option<bool> {
        match self.value {
            AttributeValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// The value rendered as text, as used for value-length validation.
    pub fn value_as_string(&self) -> String {
        self.value.to_string()
    }
}

// =============================================================================
// AttributeSet
// =============================================================================

/// An insertion-ordered collection of attributes keyed by name.
///
/// Lookups are linear scans; sets stay small (a few hundred entries at most).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    attributes: Vec<Attribute>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute unless one with the same name is already present.
    ///
    /// Returns `false` when the name was taken.
    pub fn insert(&mut self, attribute: Attribute) -> bool {
        if self.contains(attribute.name()) {
            return false;
        }
        self.attributes.push(attribute);
        true
    }

    /// Add an attribute, replacing any existing attribute of the same name.
    pub fn replace(&mut self, attribute: Attribute) -> Option<Attribute> {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => Some(std::mem::replace(existing, attribute)),
            None => {
                self.attributes.push(attribute);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Attribute> {
        let index = self.attributes.iter().position(|a| a.name == name)?;
        Some(self.attributes.remove(index))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn clear(&mut self) {
        self.attributes.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.attributes.iter()
    }

    pub fn to_vec(&self) -> Vec<Attribute> {
        self.attributes.clone()
    }
}

impl FromIterator<Attribute> for AttributeSet {
    /// Collects attributes; the first occurrence of a name wins.
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut set = AttributeSet::new();
        for attribute in iter {
            set.insert(attribute);
        }
        set
    }
}

impl IntoIterator for AttributeSet {
    type Item = Attribute;
    type IntoIter = std::vec::IntoIter<Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.attributes.into_iter()
    }
}

impl<'a> IntoIterator for &'a AttributeSet {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.attributes.iter()
    }
}

/// Serialized as a flat `name -> value` object, the collector's wire shape.
impl Serialize for AttributeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attributes.len()))?;
        for attribute in &self.attributes {
            map.serialize_entry(&attribute.name, &attribute.value)?;
        }
        map.end()
    }
}
