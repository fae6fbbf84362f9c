//! Attribute and event validation rules.
//!
//! Pure functions over static rule tables. Nothing here panics or returns an
//! error: rejections are reported as `false` (or by omission from a filtered
//! collection) and logged at `warn` level.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::attribute::{Attribute, AttributeValue};
use crate::event::EventCategory;

/// Attribute and event names must be shorter than this many bytes.
pub const ATTRIBUTE_NAME_MAX_LENGTH: usize = 255;

/// String attribute values must encode to fewer than this many UTF-8 bytes.
pub const ATTRIBUTE_VALUE_MAX_LENGTH: usize = 4096;

/// Event type used when none is supplied.
pub const DEFAULT_EVENT_TYPE: &str = "Mobile";

const RESERVED_NAMES: &[&str] = &[
    "eventType",
    "type",
    "timestamp",
    "category",
    "accountId",
    "appId",
    "appName",
    "uuid",
    "sessionId",
    "osName",
    "osVersion",
    "osMajorVersion",
    "deviceManufacturer",
    "deviceModel",
    "memUsageMb",
    "carrier",
    "newRelicVersion",
    "interactionDuration",
    "install",
    "upgradeFrom",
    "platform",
    "platformVersion",
    "lastInteraction",
    "osBuild",
    "runTime",
    "architecture",
    "appBuild",
];

const RESERVED_PREFIXES: &[&str] = &["newRelic", "nr.", "Public_"];

const EXCLUDED_NAMES: &[&str] = &["install", "upgradeFrom", "sessionDuration"];

const RESERVED_EVENT_TYPES: &[&str] = &[
    "Mobile",
    "MobileRequest",
    "MobileRequestError",
    "MobileBreadcrumb",
    "MobileCrash",
    "MobileUserAction",
    "MobileApplicationExit",
];

static EVENT_TYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{L}\p{Nd} _:.]+$").expect("event type pattern is a valid regex")
});

// =============================================================================
// Names
// =============================================================================

/// A key name is non-empty and shorter than [`ATTRIBUTE_NAME_MAX_LENGTH`].
pub fn is_valid_key_name(name: &str) -> bool {
    if name.is_empty() {
        warn!("Attribute name is empty");
        return false;
    }
    if name.len() >= ATTRIBUTE_NAME_MAX_LENGTH {
        warn!(
            "Attribute name exceeds maximum length of {} characters",
            ATTRIBUTE_NAME_MAX_LENGTH
        );
        return false;
    }
    true
}

/// A valid key name that is neither reserved nor carries a reserved prefix.
///
/// Matching is case-sensitive.
pub fn is_valid_attribute_name(name: &str) -> bool {
    if !is_valid_key_name(name) {
        return false;
    }
    if is_reserved_attribute_name(name) {
        warn!(name, "Attribute name is reserved for internal use and will be ignored");
        return false;
    }
    if let Some(prefix) = RESERVED_PREFIXES.iter().find(|p| name.starts_with(*p)) {
        warn!(name, prefix, "Attribute name starts with a reserved prefix and will be ignored");
        return false;
    }
    true
}

pub fn is_reserved_attribute_name(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Names that are tracked but never written to the attribute store.
pub fn is_excluded_attribute_name(name: &str) -> bool {
    EXCLUDED_NAMES.contains(&name)
}

// =============================================================================
// Values
// =============================================================================

/// A string value is non-empty and shorter than [`ATTRIBUTE_VALUE_MAX_LENGTH`]
/// bytes once encoded.
pub fn is_valid_attribute_value(name: &str, value: &str) -> bool {
    if value.is_empty() {
        warn!(name, "Attribute value is empty");
        return false;
    }
    if value.len() >= ATTRIBUTE_VALUE_MAX_LENGTH {
        warn!(
            name,
            "Attribute value exceeds maximum length of {} bytes", ATTRIBUTE_VALUE_MAX_LENGTH
        );
        return false;
    }
    true
}

/// Name and rendered value are both acceptable. `Void` values never are.
pub fn is_valid_attribute(attribute: &Attribute) -> bool {
    if !is_valid_attribute_name(attribute.name()) {
        return false;
    }
    if matches!(attribute.value(), AttributeValue::Void) {
        warn!(name = attribute.name(), "Attribute has no value");
        return false;
    }
    is_valid_attribute_value(attribute.name(), &attribute.value_as_string())
}

// =============================================================================
// Events
// =============================================================================

pub fn is_valid_event_name(name: &str) -> bool {
    if name.is_empty() {
        warn!("Event name is empty");
        return false;
    }
    if name.len() >= ATTRIBUTE_NAME_MAX_LENGTH {
        warn!(
            "Event name exceeds maximum length of {} characters",
            ATTRIBUTE_NAME_MAX_LENGTH
        );
        return false;
    }
    true
}

/// Letters, digits, spaces, `_`, `:` and `.` only.
pub fn is_valid_event_type(event_type: &str) -> bool {
    let valid = EVENT_TYPE_PATTERN.is_match(event_type);
    if !valid {
        warn!(event_type, "Event type is invalid and will be ignored");
    }
    valid
}

pub fn is_reserved_event_type(event_type: &str) -> bool {
    is_valid_event_type(event_type) && RESERVED_EVENT_TYPES.contains(&event_type)
}

pub fn to_valid_event_type(event_type: Option<&str>) -> String {
    match event_type {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => DEFAULT_EVENT_TYPE.to_string(),
    }
}

pub fn to_valid_category(category: Option<EventCategory>) -> EventCategory {
    category.unwrap_or(EventCategory::Custom)
}

// =============================================================================
// Collections
// =============================================================================

/// Convert typed producer input into validated attributes.
///
/// Entries with an invalid name or value are dropped with a diagnostic.
/// Output order follows the input map's iteration order.
pub fn to_validated_attributes(input: &HashMap<String, AttributeValue>) -> Vec<Attribute> {
    input
        .iter()
        .filter_map(|(name, value)| validated(name, value.clone()))
        .collect()
}

/// Convert a dynamically typed JSON object into validated attributes.
///
/// Strings, numbers (widened to double) and booleans are accepted; `null`,
/// arrays and nested objects are dropped.
pub fn to_validated_attributes_from_json(input: &Map<String, Value>) -> Vec<Attribute> {
    input
        .iter()
        .filter_map(|(name, value)| {
            let value = match value {
                Value::String(s) => AttributeValue::String(s.clone()),
                Value::Bool(b) => AttributeValue::Bool(*b),
                Value::Number(n) => match n.as_f64() {
                    Some(d) => AttributeValue::Double(d),
                    None => {
                        warn!(name = name.as_str(), "Numeric attribute is not representable");
                        return None;
                    }
                },
                other => {
                    warn!(
                        name = name.as_str(),
                        "Attribute value of type {} is not supported and will be ignored",
                        json_kind(other)
                    );
                    return None;
                }
            };
            validated(name, value)
        })
        .collect()
}

/// Re-validate an existing collection, cloning the survivors.
pub fn validated_copies<'a, I>(attributes: I) -> Vec<Attribute>
where
    I: IntoIterator<Item = &'a Attribute>,
{
    attributes
        .into_iter()
        .filter(|a| is_valid_attribute(a))
        .cloned()
        .collect()
}

fn validated(name: &str, value: AttributeValue) -> Option<Attribute> {
    if name.is_empty() {
        return None;
    }
    let attribute = Attribute::new(name, value);
    is_valid_attribute(&attribute).then_some(attribute)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "bool",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_name_length_limits() {
        assert!(!is_valid_key_name(""));
        assert!(is_valid_key_name("a"));
        assert!(is_valid_key_name(&"x".repeat(254)));
        assert!(!is_valid_key_name(&"x".repeat(255)));
    }

    #[test]
    fn test_reserved_names_rejected() {
        for name in RESERVED_NAMES {
            assert!(!is_valid_attribute_name(name), "{} should be reserved", name);
        }
        assert!(is_valid_attribute_name("cartTotal"));
    }

    #[test]
    fn test_reserved_prefixes_are_case_sensitive() {
        assert!(!is_valid_attribute_name("newRelicFoo"));
        assert!(!is_valid_attribute_name("nr.thing"));
        assert!(!is_valid_attribute_name("Public_key"));
        assert!(is_valid_attribute_name("newrelic.foo"));
        assert!(is_valid_attribute_name("NR.thing"));
        assert!(is_valid_attribute_name("public_key"));
        assert!(is_valid_attribute_name("EventType"));
    }

    #[test]
    fn test_excluded_names() {
        assert!(is_excluded_attribute_name("install"));
        assert!(is_excluded_attribute_name("upgradeFrom"));
        assert!(is_excluded_attribute_name("sessionDuration"));
        assert!(!is_excluded_attribute_name("session"));
    }

    #[test]
    fn test_value_length_counts_utf8_bytes() {
        assert!(!is_valid_attribute_value("k", ""));
        assert!(is_valid_attribute_value("k", &"a".repeat(4095)));
        assert!(!is_valid_attribute_value("k", &"a".repeat(4096)));
        // 2048 two-byte characters encode to exactly 4096 bytes.
        assert!(!is_valid_attribute_value("k", &"é".repeat(2048)));
        assert!(is_valid_attribute_value("k", &"é".repeat(2047)));
    }

    #[test]
    fn test_is_valid_attribute() {
        assert!(is_valid_attribute(&Attribute::new("count", 3)));
        assert!(is_valid_attribute(&Attribute::new("flag", false)));
        assert!(!is_valid_attribute(&Attribute::new("count", "")));
        assert!(!is_valid_attribute(&Attribute::new("eventType", "x")));
        assert!(!is_valid_attribute(&Attribute::new("void", AttributeValue::Void)));
    }

    #[test]
    fn test_event_names() {
        assert!(!is_valid_event_name(""));
        assert!(is_valid_event_name("checkout"));
        assert!(!is_valid_event_name(&"e".repeat(255)));
    }

    #[test]
    fn test_event_types() {
        assert!(is_valid_event_type("Purchase"));
        assert!(is_valid_event_type("Purchase Complete: step.2_b"));
        assert!(is_valid_event_type("Kauf abgeschlossen"));
        assert!(is_valid_event_type("購入"));
        assert!(!is_valid_event_type(""));
        assert!(!is_valid_event_type("purchase-complete"));
        assert!(!is_valid_event_type("cart/checkout"));
    }

    #[test]
    fn test_reserved_event_types() {
        assert!(is_reserved_event_type("Mobile"));
        assert!(is_reserved_event_type("MobileRequestError"));
        assert!(is_reserved_event_type("MobileApplicationExit"));
        assert!(!is_reserved_event_type("MobileCustom"));
        assert!(!is_reserved_event_type("mobile"));
    }

    #[test]
    fn test_event_type_and_category_defaults() {
        assert_eq!(to_valid_event_type(None), "Mobile");
        assert_eq!(to_valid_event_type(Some("")), "Mobile");
        assert_eq!(to_valid_event_type(Some("Purchase")), "Purchase");
        assert_eq!(to_valid_category(None), EventCategory::Custom);
        assert_eq!(
            to_valid_category(Some(EventCategory::Crash)),
            EventCategory::Crash
        );
    }

    #[test]
    fn test_to_validated_attributes_drops_invalid_entries() {
        let mut input = HashMap::new();
        input.insert("sku".to_string(), AttributeValue::from("A-100"));
        input.insert("qty".to_string(), AttributeValue::from(2_u8));
        input.insert("gift".to_string(), AttributeValue::from(true));
        input.insert("".to_string(), AttributeValue::from("empty key"));
        input.insert("timestamp".to_string(), AttributeValue::from(1));
        input.insert("note".to_string(), AttributeValue::from(""));
        input.insert("nothing".to_string(), AttributeValue::Void);

        let mut names: Vec<String> = to_validated_attributes(&input)
            .into_iter()
            .map(|a| a.name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["gift", "qty", "sku"]);
    }

    #[test]
    fn test_to_validated_attributes_from_json() {
        let input = serde_json::json!({
            "price": 9.99,
            "count": 12345678901234_i64,
            "promo": "SPRING",
            "member": true,
            "missing": null,
            "tags": ["a", "b"],
            "nested": {"a": 1},
            "nr.internal": "x"
        });
        let attributes = to_validated_attributes_from_json(input.as_object().unwrap());
        assert_eq!(attributes.len(), 4);

        let count = attributes.iter().find(|a| a.name() == "count").unwrap();
        assert_eq!(count.double_value(), Some(12345678901234.0));
        let member = attributes.iter().find(|a| a.name() == "member").unwrap();
        assert_eq!(member.bool_value(), Some(true));
    }

    #[test]
    fn test_validated_copies() {
        let source = vec![
            Attribute::new("ok", 1),
            Attribute::new("osName", "Linux"),
            Attribute::new("blank", ""),
        ];
        let copies = validated_copies(&source);
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].name(), "ok");
    }
}
