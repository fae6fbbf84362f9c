//! Attribute-rewriting listener decorator.
//!
//! [`EventTransformAdapter`] rewrites selected attribute values of every
//! event offered to the buffer, then forwards each callback unchanged to the
//! listener it wraps. The typical use is scrubbing identifiers out of request
//! URLs before they leave the device.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use crate::attribute::{names, AttributeValue};
use crate::buffer::EventBuffer;
use crate::config::UrlTransform;
use crate::event::{Event, EventCategory};
use crate::listener::{EventListener, NoopListener};
use crate::validator;

/// A compiled rewrite rule.
#[derive(Debug, Clone)]
struct TransformRule {
    pattern: Regex,
    replacement: Option<String>,
}

/// Listener decorator that rewrites attribute values by regex.
pub struct EventTransformAdapter {
    inner: Arc<dyn EventListener>,
    rules: HashMap<String, Vec<TransformRule>>,
    categories: Option<Vec<EventCategory>>,
}

impl Default for EventTransformAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTransformAdapter {
    /// An adapter with no rules around a pass-through listener.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NoopListener),
            rules: HashMap::new(),
            categories: None,
        }
    }

    /// An adapter that only rewrites `requestUrl` on network request and
    /// request-error events.
    pub fn network_requests(transforms: &[UrlTransform]) -> Self {
        let mut adapter = Self::new().only_categories(&[
            EventCategory::NetworkRequest,
            EventCategory::RequestError,
        ]);
        for transform in transforms {
            adapter.add_rule(
                names::REQUEST_URL,
                &transform.pattern,
                transform.replacement.as_deref(),
            );
        }
        adapter
    }

    /// Forward every callback to `inner` after rewriting.
    pub fn wrapping(mut self, inner: Arc<dyn EventListener>) -> Self {
        self.inner = inner;
        self
    }

    /// Restrict rewriting to events of the given categories.
    pub fn only_categories(mut self, categories: &[EventCategory]) -> Self {
        self.categories = Some(categories.to_vec());
        self
    }

    /// Add rules for one attribute. Invalid patterns are logged and skipped.
    pub fn with_attribute_transform(
        mut self,
        attribute: &str,
        rules: &[(&str, Option<&str>)],
    ) -> Self {
        for (pattern, replacement) in rules {
            self.add_rule(attribute, pattern, *replacement);
        }
        self
    }

    fn add_rule(&mut self, attribute: &str, pattern: &str, replacement: Option<&str>) {
        match Regex::new(pattern) {
            Ok(pattern) => self
                .rules
                .entry(attribute.to_string())
                .or_default()
                .push(TransformRule {
                    pattern,
                    replacement: replacement.map(str::to_string),
                }),
            Err(e) => warn!(attribute, pattern, error = %e, "Invalid transform pattern ignored"),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Rewrite the configured string attributes of `event` in place.
    pub fn on_event_transform(&self, event: &mut Event) {
        if let Some(categories) = &self.categories {
            if !categories.contains(&event.category()) {
                return;
            }
        }
        for name in self.rules.keys() {
            let Some(attribute) = event.attribute_mut(name) else {
                continue;
            };
            let Some(current) = attribute.string_value() else {
                continue;
            };
            let transformed = self.on_attribute_transform(name, current);
            if transformed == current {
                continue;
            }
            if !validator::is_valid_attribute_value(name, &transformed) {
                warn!(
                    attribute = name.as_str(),
                    "Transformed value is not a valid attribute value, keeping original"
                );
                continue;
            }
            debug!(attribute = name.as_str(), "Attribute value transformed");
            attribute.set_value(AttributeValue::String(transformed));
        }
    }

    /// Apply every rule registered for `attribute` to `value`, in order.
    pub fn on_attribute_transform(&self, attribute: &str, value: &str) -> String {
        match self.rules.get(attribute) {
            Some(rules) => rules.iter().fold(value.to_string(), |acc, rule| {
                apply_rule(&rule.pattern, rule.replacement.as_deref(), &acc)
            }),
            None => value.to_string(),
        }
    }
}

/// Replace every match, or mask the capture groups of the first match with `*`.
fn apply_rule(pattern: &Regex, replacement: Option<&str>, value: &str) -> String {
    match replacement {
        Some(replacement) => pattern.replace_all(value, replacement).into_owned(),
        None => {
            let Some(captures) = pattern.captures(value) else {
                return value.to_string();
            };
            let mut masked = String::with_capacity(value.len());
            let mut cursor = 0;
            for group in captures.iter().skip(1).flatten() {
                if group.start() < cursor {
                    continue;
                }
                masked.push_str(&value[cursor..group.start()]);
                masked.extend(group.as_str().chars().map(|_| '*'));
                cursor = group.end();
            }
            masked.push_str(&value[cursor..]);
            masked
        }
    }
}

impl EventListener for EventTransformAdapter {
    fn on_event_added(&self, event: &mut Event) -> bool {
        self.on_event_transform(event);
        self.inner.on_event_added(event)
    }

    fn on_event_overflow(&self, event: &Event) -> bool {
        self.inner.on_event_overflow(event)
    }

    fn on_event_evicted(&self, event: &Event) -> bool {
        self.inner.on_event_evicted(event)
    }

    fn on_event_queue_size_exceeded(&self, current_size: usize) {
        self.inner.on_event_queue_size_exceeded(current_size);
    }

    fn on_event_queue_time_exceeded(&self, max_buffer_time_secs: u64) {
        self.inner.on_event_queue_time_exceeded(max_buffer_time_secs);
    }

    fn on_event_flush(&self) {
        self.inner.on_event_flush();
    }

    fn on_start(&self, buffer: &EventBuffer) {
        self.inner.on_start(buffer);
    }

    fn on_shutdown(&self) {
        self.inner.on_shutdown();
    }
}
